//! Resumable transfer primitive
//!
//! A transport knows how to describe a remote resource and how to stream its
//! body starting at a byte offset. Whether partial content is honoured is a
//! capability of the server, reported by `probe` and confirmed by `fetch`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use url::Url;

use crate::core::error_handling::TransferError;
use crate::core::models::DownloadConfig;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// What the server says about a resource before the transfer starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceProbe {
    pub content_length: Option<u64>,
    pub supports_ranges: bool,
}

/// Body of a (possibly partial) response
pub struct TransferBody {
    /// Byte offset of the first chunk in `stream`; 0 when the server ignored the range
    pub offset: u64,
    /// Full size of the resource, when known
    pub total_size: Option<u64>,
    pub stream: ByteStream,
}

impl TransferBody {
    /// A body with nothing left to send
    pub fn complete(total_size: u64) -> Self {
        Self {
            offset: total_size,
            total_size: Some(total_size),
            stream: futures::stream::empty().boxed(),
        }
    }
}

impl std::fmt::Debug for TransferBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferBody")
            .field("offset", &self.offset)
            .field("total_size", &self.total_size)
            .finish()
    }
}

#[async_trait]
pub trait ResumableTransport: Send + Sync {
    async fn probe(&self, url: &Url) -> Result<ResourceProbe, TransferError>;

    /// Stream the resource from `offset` (0 for a full transfer)
    async fn fetch(&self, url: &Url, offset: u64) -> Result<TransferBody, TransferError>;
}

/// HTTP transport on top of `reqwest`
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &DownloadConfig) -> Result<Self, TransferError> {
        Ok(Self {
            client: crate::utils::network::build_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn header_u64(headers: &header::HeaderMap, name: header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parse `bytes <start>-<end>/<total>` or `bytes */<total>`
pub fn parse_content_range(value: &str) -> Option<(Option<u64>, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;

    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };

    let start = match range.trim() {
        "*" => None,
        r => {
            let (start, _end) = r.split_once('-')?;
            Some(start.trim().parse::<u64>().ok()?)
        }
    };

    Some((start, total))
}

#[async_trait]
impl ResumableTransport for HttpTransport {
    async fn probe(&self, url: &Url) -> Result<ResourceProbe, TransferError> {
        let response = self.client.head(url.clone()).send().await?;

        if !response.status().is_success() {
            // 有些服务器不支持HEAD，交给GET处理
            tracing::warn!(
                "HEAD {} returned {}, probing without range support",
                url,
                response.status()
            );
            return Ok(ResourceProbe::default());
        }

        let headers = response.headers();
        let supports_ranges = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase().contains("bytes"))
            .unwrap_or(false);

        let probe = ResourceProbe {
            content_length: header_u64(headers, header::CONTENT_LENGTH),
            supports_ranges,
        };
        tracing::debug!("Probed {}: {:?}", url, probe);
        Ok(probe)
    }

    async fn fetch(&self, url: &Url, offset: u64) -> Result<TransferBody, TransferError> {
        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let content_range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match interpret_response(
            response.status(),
            content_range.as_deref(),
            response.content_length(),
            offset,
        )? {
            RangeAnswer::Complete(total) => Ok(TransferBody::complete(total)),
            RangeAnswer::Body { offset, total_size } => Ok(TransferBody {
                offset,
                total_size,
                stream: response.bytes_stream().map_err(TransferError::from).boxed(),
            }),
        }
    }
}

/// How a (possibly ranged) GET was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeAnswer {
    /// The body starts at `offset`
    Body {
        offset: u64,
        total_size: Option<u64>,
    },
    /// Nothing left to send; the resource is `total` bytes
    Complete(u64),
}

/// Map status and range headers of a GET for byte `requested` onwards
pub fn interpret_response(
    status: StatusCode,
    content_range: Option<&str>,
    content_length: Option<u64>,
    requested: u64,
) -> Result<RangeAnswer, TransferError> {
    let content_range = content_range.and_then(parse_content_range);

    match status {
        StatusCode::PARTIAL_CONTENT => {
            let (start, total) = content_range.unwrap_or((Some(requested), None));
            let start = start.unwrap_or(requested);
            let total = total.or_else(|| content_length.map(|len| start + len));
            Ok(RangeAnswer::Body {
                offset: start,
                total_size: total,
            })
        }
        StatusCode::RANGE_NOT_SATISFIABLE => match content_range {
            // 已经下载完整
            Some((_, Some(total))) if total == requested => Ok(RangeAnswer::Complete(total)),
            _ => Err(TransferError::HttpStatus {
                status: status.as_u16(),
            }),
        },
        // 服务器忽略了Range，从头开始
        status if status.is_success() => Ok(RangeAnswer::Body {
            offset: 0,
            total_size: content_length,
        }),
        status => Err(TransferError::HttpStatus {
            status: status.as_u16(),
        }),
    }
}
