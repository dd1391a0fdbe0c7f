//! API request and response models
//!
//! Request bodies use the camelCase keys existing clients send. Every signed
//! request knows how to build its own canonical source string.

use crate::{
    auth::CanonicalString,
    common::types::{BlockRecord, TxResponse},
    errors::{GatewayError, GatewayResult},
    orchestrator::Invocation,
};
use serde::{Deserialize, Serialize};

/// Channel create / join
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelRequest {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(rename = "orgName")]
    pub org_name: String,
    pub timestamp: i64,
    pub sign: String,
}

impl ChannelRequest {
    pub fn canonical(&self) -> String {
        CanonicalString::new()
            .field("orgName", &self.org_name)
            .field("channelID", &self.channel_id)
            .field("timestamp", self.timestamp.to_string())
            .into_string()
    }
}

/// Chaincode install / instantiate / upgrade
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChaincodeLifecycleRequest {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(rename = "orgName")]
    pub org_name: String,
    #[serde(rename = "chaincodeID")]
    pub chaincode_id: String,
    #[serde(rename = "chaincodeVersion")]
    pub chaincode_version: String,
    #[serde(rename = "chaincodePath")]
    pub chaincode_path: String,
    /// Init args for instantiate and upgrade
    pub args: Vec<String>,
    pub timestamp: i64,
    pub sign: String,
}

impl ChaincodeLifecycleRequest {
    /// Install is not channel scoped
    pub fn install_canonical(&self) -> String {
        CanonicalString::new()
            .field("orgName", &self.org_name)
            .field("chaincodeID", &self.chaincode_id)
            .field("chaincodeVersion", &self.chaincode_version)
            .field("chaincodePath", &self.chaincode_path)
            .field("timestamp", self.timestamp.to_string())
            .into_string()
    }

    /// Instantiate and upgrade
    pub fn deploy_canonical(&self) -> String {
        CanonicalString::new()
            .field("channelID", &self.channel_id)
            .field("orgName", &self.org_name)
            .field("chaincodeID", &self.chaincode_id)
            .field("chaincodeVersion", &self.chaincode_version)
            .field("chaincodePath", &self.chaincode_path)
            .field("timestamp", self.timestamp.to_string())
            .into_string()
    }
}

/// Chaincode exec / query
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChaincodeInvokeRequest {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(rename = "orgName")]
    pub org_name: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "chaincodeID")]
    pub chaincode_id: String,
    pub fcn: String,
    pub args: Vec<String>,
    #[serde(rename = "eventFilter")]
    pub event_filter: String,
    #[serde(rename = "eventCallbackUrl")]
    pub event_callback_url: String,
    pub timestamp: i64,
    pub sign: String,
}

impl ChaincodeInvokeRequest {
    pub fn ensure_args(&self) -> GatewayResult<()> {
        if self.args.is_empty() {
            return Err(GatewayError::ArgsInvalid(
                "at least 1 argument is required".to_string(),
            ));
        }
        Ok(())
    }

    fn canonical(&self, with_callback: bool) -> String {
        let mut src = CanonicalString::new()
            .field("args[0]", self.args.first().map(String::as_str).unwrap_or_default())
            .field("channelID", &self.channel_id)
            .field("orgName", &self.org_name)
            .field("userName", &self.user_name);
        for (i, arg) in self.args.iter().enumerate().skip(1) {
            src = src.field(&format!("args[{}]", i), arg);
        }
        src = src
            .field("chaincodeID", &self.chaincode_id)
            .field("fcn", &self.fcn);
        if with_callback {
            src = src.field("eventCallbackUrl", &self.event_callback_url);
        }
        src.field("timestamp", self.timestamp.to_string()).into_string()
    }

    pub fn exec_canonical(&self) -> String {
        self.canonical(true)
    }

    pub fn query_canonical(&self) -> String {
        self.canonical(false)
    }

    pub fn invocation(&self) -> Invocation {
        Invocation {
            channel_id: self.channel_id.clone(),
            org_name: self.org_name.clone(),
            user_name: self.user_name.clone(),
            chaincode_id: self.chaincode_id.clone(),
            fcn: self.fcn.clone(),
            args: self.args.clone(),
            event_filter: self.event_filter.clone(),
            event_callback_url: self.event_callback_url.clone(),
        }
    }
}

/// Query string of the paginated block listing
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaginationQuery {
    pub sort_order: String,
    pub page_number: u64,
    pub sort_name: String,
    pub limit: u64,
    pub timestamp: i64,
    pub sign: String,
}

impl Default for PaginationQuery {
    fn default() -> Self {
        Self {
            sort_order: String::new(),
            page_number: 1,
            sort_name: String::new(),
            limit: 10,
            timestamp: 0,
            sign: String::new(),
        }
    }
}

impl PaginationQuery {
    /// `StartDate` is part of the signed layout but always empty
    pub fn canonical(&self) -> String {
        CanonicalString::new()
            .field("SortOrder", &self.sort_order)
            .field("PageNumber", self.page_number.to_string())
            .field("SortName", &self.sort_name)
            .field("StartDate", "")
            .field("Limit", self.limit.to_string())
            .field("timestamp", self.timestamp.to_string())
            .into_string()
    }
}

/// Response envelope shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            code: 0,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            data: None,
        }
    }
}

/// Execute or query result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub transaction_id: String,
    /// Chaincode payload, lossily decoded as UTF-8
    pub payload: String,
    pub tx_validation_code: i32,
    /// Block record written for an executed transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockRecord>,
}

impl InvocationResponse {
    pub fn from_tx(response: &TxResponse, block: Option<BlockRecord>) -> Self {
        Self {
            transaction_id: response.transaction_id.clone(),
            payload: String::from_utf8_lossy(&response.payload).into_owned(),
            tx_validation_code: response.validation_code,
            block,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockListResponse {
    pub total: u64,
    pub rows: Vec<BlockRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub organizations: Vec<String>,
}
