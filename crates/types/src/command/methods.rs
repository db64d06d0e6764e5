//! The single method table: one source of truth for every RPC method the
//! node speaks, on the local endpoint and on consensus topics alike.
//!
//! Each entry pairs the wire name (`Service.Method`) with a stable numeric
//! code; encode and decode both consult this table, so the two halves of the
//! protocol cannot drift apart.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// The services the node exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Ping,
    Session,
    Contract,
    Node,
}

impl ServiceId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PingService",
            Self::Session => "SessionService",
            Self::Contract => "ContractService",
            Self::Node => "NodeService",
        }
    }
}

/// One row of the method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub service: ServiceId,
    pub method: &'static str,
    /// Stable numeric code; never reuse or renumber.
    pub code: u16,
    /// Local-only methods are rejected when they arrive over a topic.
    pub local_only: bool,
    /// Reachable without a session cookie (sign-up path only).
    pub unauthenticated: bool,
}

impl MethodDescriptor {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.service.name(), self.method)
    }
}

const fn local(service: ServiceId, method: &'static str, code: u16) -> MethodDescriptor {
    MethodDescriptor {
        service,
        method,
        code,
        local_only: true,
        unauthenticated: false,
    }
}

const fn routed(service: ServiceId, method: &'static str, code: u16) -> MethodDescriptor {
    MethodDescriptor {
        service,
        method,
        code,
        local_only: false,
        unauthenticated: false,
    }
}

const fn open(service: ServiceId, method: &'static str, code: u16) -> MethodDescriptor {
    MethodDescriptor {
        service,
        method,
        code,
        local_only: true,
        unauthenticated: true,
    }
}

/// Every method the node understands. Codes are grouped by service:
/// `0x00xx` ping, `0x01xx` session, `0x02xx` contract, `0x03xx` node.
pub const METHODS: &[MethodDescriptor] = &[
    routed(ServiceId::Ping, "SayHello", 0x0001),
    // Session gateway (local UI only; sign-up path is unauthenticated).
    open(ServiceId::Session, "SignUp", 0x0101),
    open(ServiceId::Session, "GetSignInPayload", 0x0102),
    open(ServiceId::Session, "SignIn", 0x0103),
    local(ServiceId::Session, "SignOut", 0x0104),
    local(ServiceId::Session, "IsSessionValid", 0x0105),
    // Contract calls: composed locally, signed by the operator wallet.
    local(ServiceId::Contract, "Deploy", 0x0201),
    local(ServiceId::Contract, "GetCurrentHiveCycle", 0x0202),
    local(ServiceId::Contract, "RegisterOperator", 0x0203),
    local(ServiceId::Contract, "UnregisterOperator", 0x0204),
    local(ServiceId::Contract, "DepositOperatorFunds", 0x0205),
    local(ServiceId::Contract, "WithdrawOperatorFunds", 0x0206),
    local(ServiceId::Contract, "GetOperatorFunds", 0x0207),
    local(ServiceId::Contract, "GetReservedOperatorFunds", 0x0208),
    local(ServiceId::Contract, "IsOperator", 0x0209),
    local(ServiceId::Contract, "GetOperatorLastActivity", 0x020a),
    local(ServiceId::Contract, "AddNode", 0x020b),
    local(ServiceId::Contract, "RemoveNode", 0x020c),
    local(ServiceId::Contract, "IsNode", 0x020d),
    local(ServiceId::Contract, "DepositNodeStake", 0x020e),
    local(ServiceId::Contract, "WithdrawNodeStake", 0x020f),
    local(ServiceId::Contract, "GetNodeStake", 0x0210),
    local(ServiceId::Contract, "AddRenderJob", 0x0211),
    local(ServiceId::Contract, "ClaimRenderJob", 0x0212),
    // Job lifecycle: create/submit/pause are local, the queue-topic
    // envelopes (submit, cancel, claim, complete) are log-accepted.
    local(ServiceId::Node, "CreateRenderRequest", 0x0301),
    routed(ServiceId::Node, "SubmitRenderRequest", 0x0302),
    routed(ServiceId::Node, "CancelRenderRequest", 0x0303),
    local(ServiceId::Node, "CreateRenderOffer", 0x0304),
    routed(ServiceId::Node, "SubmitRenderOffer", 0x0305),
    routed(ServiceId::Node, "PauseRenderOffer", 0x0306),
    routed(ServiceId::Node, "ClaimRenderJob", 0x0307),
    routed(ServiceId::Node, "CompleteRenderJob", 0x0308),
];

static BY_NAME: Lazy<HashMap<String, &'static MethodDescriptor>> =
    Lazy::new(|| METHODS.iter().map(|m| (m.full_name(), m)).collect());

static BY_CODE: Lazy<HashMap<u16, &'static MethodDescriptor>> =
    Lazy::new(|| METHODS.iter().map(|m| (m.code, m)).collect());

/// Looks up a method by its wire name, e.g. `"NodeService.SubmitRenderRequest"`.
pub fn find(full_name: &str) -> Option<&'static MethodDescriptor> {
    BY_NAME.get(full_name).copied()
}

/// Looks up a method by its stable numeric code.
pub fn find_by_code(code: u16) -> Option<&'static MethodDescriptor> {
    BY_CODE.get(&code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_and_names_are_unique() {
        let codes: HashSet<u16> = METHODS.iter().map(|m| m.code).collect();
        assert_eq!(codes.len(), METHODS.len());
        let names: HashSet<String> = METHODS.iter().map(|m| m.full_name()).collect();
        assert_eq!(names.len(), METHODS.len());
    }

    #[test]
    fn lookup_by_name_and_code_agree() {
        let m = find("NodeService.SubmitRenderRequest").unwrap();
        assert_eq!(m.code, 0x0302);
        assert!(!m.local_only);
        assert_eq!(find_by_code(m.code).unwrap().full_name(), m.full_name());

        assert!(find("NodeService.DoesNotExist").is_none());
    }

    #[test]
    fn signup_path_is_unauthenticated() {
        for name in ["SessionService.SignUp", "SessionService.GetSignInPayload"] {
            assert!(find(name).unwrap().unauthenticated, "{name}");
        }
        assert!(!find("SessionService.SignOut").unwrap().unauthenticated);
    }
}
