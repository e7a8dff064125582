use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::Debug;

use crate::actions::{DecompositionHandler, WorkItem};

/// Calls `params.url`. The request body is `params.body` if given, otherwise
/// the instance input. Output is `{ status, data }`.
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHandler {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl DecompositionHandler for HttpHandler {
    fn name(&self) -> &str {
        "http"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("url").and_then(|v| v.as_str()).is_none() {
            return Err(anyhow!("Missing required parameter: url"));
        }
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> Result<Value> {
        let params = &item.params;
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Invalid url"))?;

        let method_str = params.get("method").and_then(|v| v.as_str()).unwrap_or("POST");
        let method = method_str
            .parse::<reqwest::Method>()
            .map_err(|_| anyhow!("Invalid HTTP method: {}", method_str))?;

        let mut builder = self.client.request(method.clone(), url);
        if method != reqwest::Method::GET {
            builder = builder.json(params.get("body").unwrap_or(&item.input));
        }
        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v_str) = v.as_str() {
                    builder = builder.header(k, v_str);
                }
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        // Non-JSON bodies come back as null data.
        let data = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(json!({
            "status": status,
            "data": data
        }))
    }
}
