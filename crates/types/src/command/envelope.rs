//! Encoding and decoding of command envelopes.

use super::jsonrpc::{JsonRpcRequest, RequestId, JSONRPC_VERSION};
use super::methods::{self, MethodDescriptor};
use crate::app::AccountAddress;
use crate::error::ProtocolError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The envelope protocol version this node speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

/// The three-field JSON object carried on a consensus topic.
///
/// `aud` is advisory addressing (empty = broadcast); ordering between any two
/// envelopes on the same topic is the log's ordering and is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub ver: String,
    pub aud: Vec<String>,
    /// base64 of a JSON-RPC 2.0 request with `id = -1`.
    pub rpc: String,
}

/// A command held as a typed value in memory.
///
/// Marshalling to the wire form happens only in [`Command::encode`]; inbound
/// envelopes are immediately lifted back into this form by
/// [`Command::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub version: String,
    pub audience: Vec<AccountAddress>,
    pub descriptor: &'static MethodDescriptor,
    pub params: Value,
}

impl Command {
    /// A broadcast command (empty audience).
    pub fn broadcast(descriptor: &'static MethodDescriptor, params: Value) -> Self {
        Self::addressed(Vec::new(), descriptor, params)
    }

    pub fn addressed(
        audience: Vec<AccountAddress>,
        descriptor: &'static MethodDescriptor,
        params: Value,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_owned(),
            audience,
            descriptor,
            params,
        }
    }

    /// Marshals the command into its wire form.
    pub fn encode(&self) -> Result<CommandEnvelope, ProtocolError> {
        let request = JsonRpcRequest::new(
            RequestId::ENVELOPE,
            self.descriptor.full_name(),
            self.params.clone(),
        );
        let body = serde_json::to_vec(&request)
            .map_err(|e| ProtocolError::Malformed(format!("rpc body encode: {e}")))?;
        Ok(CommandEnvelope {
            ver: self.version.clone(),
            aud: self.audience.iter().map(|a| a.to_string()).collect(),
            rpc: BASE64.encode(body),
        })
    }

    /// Lifts an inbound envelope back into a typed command.
    ///
    /// Returns `Ok(None)` when the audience field addresses other nodes: the
    /// envelope is valid but not for us, and is dropped without noise.
    pub fn decode(
        envelope: &CommandEnvelope,
        local_address: &AccountAddress,
    ) -> Result<Option<Self>, ProtocolError> {
        if !version_compatible(&envelope.ver) {
            return Err(ProtocolError::VersionMismatch {
                got: envelope.ver.clone(),
            });
        }

        let mut audience = Vec::with_capacity(envelope.aud.len());
        for addr in &envelope.aud {
            audience.push(AccountAddress::parse(addr)?);
        }
        if !audience.is_empty() && !audience.contains(local_address) {
            return Ok(None);
        }

        let body = BASE64
            .decode(&envelope.rpc)
            .map_err(|e| ProtocolError::Malformed(format!("rpc body base64: {e}")))?;
        let request: JsonRpcRequest = serde_json::from_slice(&body)
            .map_err(|e| ProtocolError::Malformed(format!("rpc body json: {e}")))?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::Malformed(format!(
                "unexpected jsonrpc version {}",
                request.jsonrpc
            )));
        }
        let descriptor = methods::find(&request.method).ok_or_else(|| {
            ProtocolError::UnknownMethod {
                method: request.method.clone(),
            }
        })?;

        Ok(Some(Self {
            version: envelope.ver.clone(),
            audience,
            descriptor,
            params: request.params,
        }))
    }
}

/// `1.x` versions are wire-compatible with this node; anything else is not.
fn version_compatible(ver: &str) -> bool {
    ver.split('.').next() == Some("1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(s: &str) -> AccountAddress {
        AccountAddress::parse(s).unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let descriptor = methods::find("NodeService.SubmitRenderRequest").unwrap();
        let command = Command::addressed(
            vec![addr("0.0.1"), addr("0.0.2")],
            descriptor,
            json!({"cid": "bafybeigdyrzt5example"}),
        );

        let envelope = command.encode().unwrap();
        assert_eq!(envelope.ver, PROTOCOL_VERSION);
        assert_eq!(envelope.aud, vec!["0.0.1", "0.0.2"]);

        // The base64 payload decodes to a JSON-RPC call with the full
        // service-qualified method name and the envelope id.
        let body = BASE64.decode(&envelope.rpc).unwrap();
        let request: JsonRpcRequest = serde_json::from_slice(&body).unwrap();
        assert_eq!(request.method, "NodeService.SubmitRenderRequest");
        assert_eq!(request.id, RequestId::Number(-1));

        let decoded = Command::decode(&envelope, &addr("0.0.2")).unwrap().unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn audience_filter() {
        let descriptor = methods::find("PingService.SayHello").unwrap();
        let command = Command::addressed(vec![addr("0.0.7")], descriptor, json!({}));
        let envelope = command.encode().unwrap();

        assert!(Command::decode(&envelope, &addr("0.0.7")).unwrap().is_some());
        assert!(Command::decode(&envelope, &addr("0.0.8")).unwrap().is_none());

        // Empty audience is a broadcast and reaches everyone.
        let broadcast = Command::broadcast(descriptor, json!({})).encode().unwrap();
        assert!(Command::decode(&broadcast, &addr("0.0.8")).unwrap().is_some());
    }

    #[test]
    fn version_gate() {
        let descriptor = methods::find("PingService.SayHello").unwrap();
        let mut envelope = Command::broadcast(descriptor, json!({})).encode().unwrap();

        envelope.ver = "1.1".into();
        assert!(Command::decode(&envelope, &addr("0.0.1")).is_ok());

        envelope.ver = "2.0".into();
        assert!(matches!(
            Command::decode(&envelope, &addr("0.0.1")),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_method_is_a_protocol_error() {
        let body = serde_json::to_vec(&JsonRpcRequest::new(
            RequestId::ENVELOPE,
            "NodeService.Nonexistent",
            json!({}),
        ))
        .unwrap();
        let envelope = CommandEnvelope {
            ver: PROTOCOL_VERSION.into(),
            aud: vec![],
            rpc: BASE64.encode(body),
        };
        assert!(matches!(
            Command::decode(&envelope, &addr("0.0.1")),
            Err(ProtocolError::UnknownMethod { .. })
        ));
    }
}
