//! Oracle params query over the node's REST (LCD) API

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::StreamError;
use crate::types::{u64_from_str_or_int, AssetPair, Params};

const PARAMS_PATH: &str = "/nibiru/oracle/v1beta1/params";

/// Query for the current oracle params
#[async_trait]
pub trait ParamsQuerier: Send + Sync {
    async fn query_params(&self) -> Result<Params, StreamError>;
}

#[derive(Debug, Deserialize)]
struct ParamsResponse {
    params: OracleParams,
}

#[derive(Debug, Deserialize)]
struct OracleParams {
    #[serde(deserialize_with = "u64_from_str_or_int")]
    vote_period: u64,
    #[serde(default)]
    whitelist: Vec<AssetPair>,
}

impl TryFrom<OracleParams> for Params {
    type Error = StreamError;

    fn try_from(raw: OracleParams) -> Result<Self, Self::Error> {
        Ok(Params::new(raw.whitelist, raw.vote_period)?)
    }
}

#[derive(Debug, Clone)]
pub struct RestParamsClient {
    client: Client,
    url: String,
}

impl RestParamsClient {
    pub fn new(lcd_url: &str, request_timeout: Duration) -> Result<Self, StreamError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}{}", lcd_url.trim_end_matches('/'), PARAMS_PATH),
        })
    }
}

#[async_trait]
impl ParamsQuerier for RestParamsClient {
    async fn query_params(&self) -> Result<Params, StreamError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(StreamError::ParamsStatus(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        parse_params(&body)
    }
}

fn parse_params(body: &[u8]) -> Result<Params, StreamError> {
    let response: ParamsResponse = serde_json::from_slice(body)?;
    response.params.try_into()
}
