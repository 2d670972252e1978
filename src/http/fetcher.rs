//! Network access behind a trait so the router and queue can be driven by
//! scripted fetchers in tests.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Body, FormPart, Request, Response};
use crate::error::{OfflineError, Result};

/// Performs one network round trip.
///
/// Any HTTP status is a successful fetch; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Run a fetch with an upper bound; a timeout is reported as
/// [`OfflineError::Timeout`].
pub async fn fetch_with_timeout(
  fetcher: &dyn Fetcher,
  request: &Request,
  timeout: Duration,
) -> Result<Response> {
  tokio::time::timeout(timeout, fetcher.fetch(request))
    .await
    .map_err(|_| OfflineError::Timeout(timeout))?
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| OfflineError::Transport(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }

  fn build_form(parts: &[FormPart]) -> Result<Form> {
    let mut form = Form::new();
    for part in parts {
      form = match part {
        FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
        FormPart::File {
          name,
          file_name,
          mime,
          bytes,
        } => {
          let file = Part::bytes(bytes.clone())
            .file_name(file_name.clone())
            .mime_str(mime)
            .map_err(|e| OfflineError::InvalidRequest(format!("bad mime {}: {}", mime, e)))?;
          form.part(name.clone(), file)
        }
      };
    }
    Ok(form)
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    builder = match &request.body {
      Body::Empty => builder,
      Body::Bytes(bytes) => builder.body(bytes.clone()),
      Body::Multipart(parts) => builder.multipart(Self::build_form(parts)?),
    };

    let response = builder.send().await?;

    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
