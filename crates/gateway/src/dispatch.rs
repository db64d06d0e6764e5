//! Method dispatch for the local endpoint.
//!
//! One table drives everything: the method descriptor decides whether a
//! session cookie is required, and the `(service, method)` pair routes to
//! the owning subsystem. Errors map to stable JSON-RPC codes with the
//! machine-readable taxon code attached as data.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use renderhive_api::consensus::{ContractParams, FrozenTransaction};
use renderhive_services::cycle::HiveCycleEngine;
use renderhive_services::jobs::{
    CreateRenderOfferParams, CreateRenderRequestParams, JobManager,
};
use renderhive_services::session::{SessionGateway, SignUpRequest};
use renderhive_types::app::{AccountAddress, Cid};
use renderhive_types::command::{
    self, JsonRpcError, JsonRpcRequest, JsonRpcResponse, MethodDescriptor, RequestId, ServiceId,
    JSONRPC_VERSION,
};
use renderhive_types::error::{CoreError, ErrorCode, ProtocolError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// The subsystems the endpoint fans out to.
pub struct GatewayContext {
    pub session: Arc<SessionGateway>,
    pub jobs: Arc<JobManager>,
    pub cycle: Arc<HiveCycleEngine>,
}

#[derive(Deserialize)]
struct PassphraseParams {
    passphrase: String,
}

#[derive(Deserialize)]
struct AmountParams {
    amount: u64,
}

#[derive(Deserialize)]
struct AddressParams {
    address: AccountAddress,
}

#[derive(Deserialize)]
struct CidParams {
    cid: Cid,
}

#[derive(Deserialize)]
struct PauseParams {
    paused: bool,
}

#[derive(Deserialize)]
struct DeployParams {
    /// Hex contract bytecode.
    bytecode: String,
}

#[derive(Deserialize)]
struct AddRenderJobParams {
    cid: Cid,
    #[serde(default)]
    max_price: u64,
}

#[derive(Deserialize)]
struct ClaimComposeParams {
    cid: Cid,
    hive_cycle: u64,
    work_share: u32,
    /// Hex, 32 bytes, forwarded verbatim.
    consensus_root: String,
    job_root: String,
}

/// Dispatches one UI request. Returns the response and, for a successful
/// sign-in, the token to set as the session cookie.
pub async fn dispatch(
    ctx: &GatewayContext,
    request: JsonRpcRequest,
    session_cookie: Option<&str>,
) -> (JsonRpcResponse, Option<String>) {
    let id = request.id.clone();
    if request.jsonrpc != JSONRPC_VERSION {
        return (
            JsonRpcResponse::failure(id, -32600, "invalid jsonrpc version"),
            None,
        );
    }
    let Some(descriptor) = command::find(&request.method) else {
        // Unknown pairs get an RPC error back only on the UI path.
        return (
            JsonRpcResponse::failure(id, -32601, format!("method {} not found", request.method)),
            None,
        );
    };

    if !descriptor.unauthenticated {
        let verified = session_cookie
            .ok_or(CoreError::Unauthorized)
            .and_then(|value| ctx.session.verify_cookie(value));
        if let Err(e) = verified {
            return (error_response(id, &e), None);
        }
    }

    match route(ctx, descriptor, request.params).await {
        Ok((result, set_cookie)) => (JsonRpcResponse::success(id, result), set_cookie),
        Err(e) => (error_response(id, &e), None),
    }
}

async fn route(
    ctx: &GatewayContext,
    descriptor: &'static MethodDescriptor,
    params: Value,
) -> Result<(Value, Option<String>), CoreError> {
    let mut set_cookie = None;
    let result = match (descriptor.service, descriptor.method) {
        (ServiceId::Ping, "SayHello") => json!({ "message": "Welcome to the Renderhive!" }),

        // --- Session gateway ---------------------------------------------
        (ServiceId::Session, "SignUp") => {
            let request: SignUpRequest = parse(params)?;
            to_value(ctx.session.sign_up(request).await?)?
        }
        (ServiceId::Session, "GetSignInPayload") => {
            let payload = ctx.session.get_sign_in_payload().await?;
            json!({ "payload": hex::encode(payload) })
        }
        (ServiceId::Session, "SignIn") => {
            let params: PassphraseParams = parse(params)?;
            let response = ctx.session.sign_in(&params.passphrase).await?;
            set_cookie = Some(response.token.clone());
            to_value(response)?
        }
        (ServiceId::Session, "SignOut") => to_value(ctx.session.sign_out())?,
        // Reaching this method through the authentication gate is itself
        // the proof of validity.
        (ServiceId::Session, "IsSessionValid") => json!({ "valid": true }),

        // --- Contract composition and queries ----------------------------
        (ServiceId::Contract, "Deploy") => {
            let params: DeployParams = parse(params)?;
            let bytecode = hex::decode(&params.bytecode)
                .map_err(|e| ProtocolError::InvalidParams(format!("bytecode: {e}")))?;
            let frozen = ctx.session.compose_contract_deploy(bytecode, None).await?;
            frozen_value(&frozen)
        }
        (ServiceId::Contract, "GetCurrentHiveCycle") => {
            let current = ctx.cycle.current_cycle_info()?;
            json!({
                "cycle": current.number,
                "duration": current.duration_secs,
                "network_start": current.network_start,
            })
        }
        (ServiceId::Contract, "RegisterOperator") => {
            compose(ctx, "registerOperator", ContractParams::new()).await?
        }
        (ServiceId::Contract, "UnregisterOperator") => {
            compose(ctx, "unregisterOperator", ContractParams::new()).await?
        }
        (ServiceId::Contract, "DepositOperatorFunds") => {
            let params: AmountParams = parse(params)?;
            compose(
                ctx,
                "depositOperatorFunds",
                ContractParams::new().add_uint64(params.amount),
            )
            .await?
        }
        (ServiceId::Contract, "WithdrawOperatorFunds") => {
            let params: AmountParams = parse(params)?;
            compose(
                ctx,
                "withdrawOperatorFunds",
                ContractParams::new().add_uint64(params.amount),
            )
            .await?
        }
        (ServiceId::Contract, "GetOperatorFunds") => {
            query(ctx, "getOperatorFunds", address_params(params)?).await?
        }
        (ServiceId::Contract, "GetReservedOperatorFunds") => {
            query(ctx, "getReservedOperatorFunds", address_params(params)?).await?
        }
        (ServiceId::Contract, "IsOperator") => {
            query(ctx, "isOperator", address_params(params)?).await?
        }
        (ServiceId::Contract, "GetOperatorLastActivity") => {
            query(ctx, "getOperatorLastActivity", address_params(params)?).await?
        }
        (ServiceId::Contract, "AddNode") => compose(ctx, "addNode", address_params(params)?).await?,
        (ServiceId::Contract, "RemoveNode") => {
            compose(ctx, "removeNode", address_params(params)?).await?
        }
        (ServiceId::Contract, "IsNode") => query(ctx, "isNode", address_params(params)?).await?,
        (ServiceId::Contract, "DepositNodeStake") => {
            let params: AmountParams = parse(params)?;
            compose(
                ctx,
                "depositNodeStake",
                ContractParams::new().add_uint64(params.amount),
            )
            .await?
        }
        (ServiceId::Contract, "WithdrawNodeStake") => {
            let params: AmountParams = parse(params)?;
            compose(
                ctx,
                "withdrawNodeStake",
                ContractParams::new().add_uint64(params.amount),
            )
            .await?
        }
        (ServiceId::Contract, "GetNodeStake") => {
            query(ctx, "getNodeStake", address_params(params)?).await?
        }
        (ServiceId::Contract, "AddRenderJob") => {
            let params: AddRenderJobParams = parse(params)?;
            compose(
                ctx,
                "addRenderJob",
                ContractParams::new()
                    .add_string(params.cid.as_str())
                    .add_uint64(params.max_price),
            )
            .await?
        }
        (ServiceId::Contract, "ClaimRenderJob") => {
            let params: ClaimComposeParams = parse(params)?;
            let consensus_root = decode_root(&params.consensus_root)?;
            let job_root = decode_root(&params.job_root)?;
            compose(
                ctx,
                "claimRenderJob",
                ContractParams::new()
                    .add_string(params.cid.as_str())
                    .add_uint64(params.hive_cycle)
                    .add_uint32(params.work_share)
                    .add_bytes32(&consensus_root)
                    .add_bytes32(&job_root),
            )
            .await?
        }

        // --- Job lifecycle ------------------------------------------------
        (ServiceId::Node, "CreateRenderRequest") => {
            let params: CreateRenderRequestParams = parse(params)?;
            to_value(ctx.jobs.create_render_request(params).await?)?
        }
        (ServiceId::Node, "SubmitRenderRequest") => {
            let params: CidParams = parse(params)?;
            to_value(ctx.jobs.submit_render_request(&params.cid).await?)?
        }
        (ServiceId::Node, "CancelRenderRequest") => {
            let params: CidParams = parse(params)?;
            ctx.jobs.cancel_render_request(&params.cid).await?;
            json!({ "cancelled": params.cid })
        }
        (ServiceId::Node, "CreateRenderOffer") => {
            let params: CreateRenderOfferParams = parse(params)?;
            ctx.jobs.create_render_offer(params)?;
            json!({ "created": true })
        }
        (ServiceId::Node, "SubmitRenderOffer") => to_value(ctx.jobs.submit_render_offer().await?)?,
        (ServiceId::Node, "PauseRenderOffer") => {
            let params: PauseParams = parse(params)?;
            ctx.jobs.pause_render_offer(params.paused).await?;
            json!({ "paused": params.paused })
        }

        _ => {
            return Err(ProtocolError::UnknownMethod {
                method: descriptor.full_name(),
            }
            .into())
        }
    };
    Ok((result, set_cookie))
}

async fn compose(
    ctx: &GatewayContext,
    function: &str,
    params: ContractParams,
) -> Result<Value, CoreError> {
    let frozen = ctx.session.compose_contract(function, params, None).await?;
    Ok(frozen_value(&frozen))
}

async fn query(
    ctx: &GatewayContext,
    function: &str,
    params: ContractParams,
) -> Result<Value, CoreError> {
    let result = ctx.session.query_contract(function, params).await?;
    Ok(json!({ "result": hex::encode(result) }))
}

fn address_params(params: Value) -> Result<ContractParams, CoreError> {
    let params: AddressParams = parse(params)?;
    Ok(ContractParams::new().add_address(&params.address))
}

fn frozen_value(frozen: &FrozenTransaction) -> Value {
    json!({
        "transaction_id": frozen.transaction_id,
        "payload": BASE64.encode(&frozen.bytes),
    })
}

fn decode_root(hex_root: &str) -> Result<[u8; 32], CoreError> {
    let raw = hex::decode(hex_root)
        .map_err(|e| ProtocolError::InvalidParams(format!("root: {e}")))?;
    raw.try_into()
        .map_err(|_| ProtocolError::InvalidParams("root must be 32 bytes".into()).into())
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, CoreError> {
    serde_json::from_value(params)
        .map_err(|e| ProtocolError::InvalidParams(e.to_string()).into())
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, CoreError> {
    serde_json::to_value(value)
        .map_err(|e| ProtocolError::InvalidParams(e.to_string()).into())
}

fn error_response(id: RequestId, error: &CoreError) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_owned(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code: error.rpc_code(),
            message: error.to_string(),
            data: Some(json!({ "code": error.code() })),
        }),
    }
}
