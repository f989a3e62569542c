//! src/services/oss_client.rs
//!
//! Thin signed REST client for the provider object store. Only the four
//! operations the console needs are implemented: bucket listing, bucket
//! info, batched object deletion and presigned URLs. Everything else
//! (uploads, downloads) happens browser-side against the presigned URLs.

use crate::models::BucketIdentity;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Error)]
pub enum OssError {
    #[error("oss request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oss responded {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid signing key")]
    InvalidKey,
}

pub type OssResult<T> = Result<T, OssError>;

/// One bucket row from the service-level listing.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub name: String,
    pub location: String,
    pub creation_date: String,
}

/// Detail view of a single bucket.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketDetail {
    pub name: String,
    pub location: String,
    pub creation_date: String,
    pub comment: Option<String>,
    pub owner_id: Option<String>,
    pub owner_display_name: Option<String>,
}

/// A key the remote store confirmed as deleted.
#[derive(Clone, Debug)]
pub struct DeletedObject {
    pub key: String,
}

/// Outcome of one batched delete call.
#[derive(Debug)]
pub struct DeleteMultiResult {
    pub deleted: Vec<DeletedObject>,
    pub status: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SignMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "PUT")]
    Put,
}

impl SignMethod {
    fn verb(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Options for building a presigned object URL.
#[derive(Clone, Debug)]
pub struct SignatureOptions {
    pub method: SignMethod,
    /// Validity window in seconds. Defaults to 1800.
    pub expires: Option<i64>,
    /// Content type the uploader must send; only meaningful for PUT.
    pub content_type: Option<String>,
    /// Image process pipeline forwarded as `x-oss-process`.
    pub process: Option<String>,
}

/// Remote bucket operations, abstracted so the reconciler can be exercised
/// against a scripted store in tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> OssResult<Vec<BucketSummary>>;

    async fn bucket_info(&self, name: &str) -> OssResult<BucketDetail>;

    /// Delete several objects from one bucket in a single call.
    ///
    /// Keys must be object keys, never full URLs.
    async fn delete_multi(
        &self,
        bucket: &BucketIdentity,
        keys: &[String],
    ) -> OssResult<DeleteMultiResult>;

    /// Build a V1 query-signed URL for one object.
    fn signature_url(
        &self,
        bucket: &BucketIdentity,
        key: &str,
        options: &SignatureOptions,
    ) -> OssResult<String>;
}

/// Static credentials plus the service-level endpoint, e.g.
/// `oss-cn-hangzhou.aliyuncs.com`.
#[derive(Clone, Debug)]
pub struct OssConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub endpoint: String,
}

/// reqwest-backed [`ObjectStore`] speaking the provider's V1 signed REST
/// protocol.
#[derive(Clone)]
pub struct OssClient {
    http: reqwest::Client,
    cfg: OssConfig,
}

impl OssClient {
    pub fn new(cfg: OssConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    /// Virtual-host style endpoint for one bucket. Regions may arrive with
    /// or without the `oss-` prefix.
    fn bucket_host(&self, bucket: &BucketIdentity) -> String {
        let region = if bucket.bucket_region.starts_with("oss-") {
            bucket.bucket_region.clone()
        } else {
            format!("oss-{}", bucket.bucket_region)
        };
        format!("{}.{}.aliyuncs.com", bucket.bucket_name, region)
    }

    fn sign(&self, string_to_sign: &str) -> OssResult<String> {
        let mut mac = HmacSha1::new_from_slice(self.cfg.access_key_secret.as_bytes())
            .map_err(|_| OssError::InvalidKey)?;
        mac.update(string_to_sign.as_bytes());
        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn authorization(&self, signature: &str) -> String {
        format!("OSS {}:{}", self.cfg.access_key_id, signature)
    }

    fn http_date() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// Map a non-2xx response into [`OssError::Api`], pulling the provider
    /// `<Message>` out of the error body when present.
    async fn check(response: reqwest::Response) -> OssResult<(u16, String)> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        if (200..300).contains(&status) {
            Ok((status, body))
        } else {
            let message = xml_text(&body, "Message")
                .unwrap_or("unknown error")
                .to_string();
            Err(OssError::Api { status, message })
        }
    }
}

#[async_trait]
impl ObjectStore for OssClient {
    async fn list_buckets(&self) -> OssResult<Vec<BucketSummary>> {
        let date = Self::http_date();
        let signature = self.sign(&format!("GET\n\n\n{date}\n/"))?;
        let response = self
            .http
            .get(format!("https://{}/", self.cfg.endpoint))
            .header("Date", &date)
            .header("Authorization", self.authorization(&signature))
            .send()
            .await?;
        let (_, body) = Self::check(response).await?;

        let buckets = xml_blocks(&body, "Bucket")
            .into_iter()
            .map(|block| BucketSummary {
                name: xml_text(block, "Name").unwrap_or_default().to_string(),
                location: xml_text(block, "Location").unwrap_or_default().to_string(),
                creation_date: xml_text(block, "CreationDate")
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();
        Ok(buckets)
    }

    async fn bucket_info(&self, name: &str) -> OssResult<BucketDetail> {
        let date = Self::http_date();
        let resource = format!("/{name}/?bucketInfo");
        let signature = self.sign(&format!("GET\n\n\n{date}\n{resource}"))?;
        let response = self
            .http
            .get(format!("https://{}.{}/?bucketInfo", name, self.cfg.endpoint))
            .header("Date", &date)
            .header("Authorization", self.authorization(&signature))
            .send()
            .await?;
        let (_, body) = Self::check(response).await?;

        Ok(BucketDetail {
            name: xml_text(&body, "Name").unwrap_or(name).to_string(),
            location: xml_text(&body, "Location").unwrap_or_default().to_string(),
            creation_date: xml_text(&body, "CreationDate")
                .unwrap_or_default()
                .to_string(),
            comment: xml_text(&body, "Comment").map(str::to_string),
            owner_id: xml_text(&body, "ID").map(str::to_string),
            owner_display_name: xml_text(&body, "DisplayName").map(str::to_string),
        })
    }

    async fn delete_multi(
        &self,
        bucket: &BucketIdentity,
        keys: &[String],
    ) -> OssResult<DeleteMultiResult> {
        let mut payload = String::from("<Delete><Quiet>false</Quiet>");
        for key in keys {
            payload.push_str(&format!("<Object><Key>{}</Key></Object>", xml_escape(key)));
        }
        payload.push_str("</Delete>");

        let content_md5 = general_purpose::STANDARD.encode(md5::compute(&payload).0);
        let content_type = "application/xml";
        let date = Self::http_date();
        let resource = format!("/{}/?delete", bucket.bucket_name);
        let signature = self.sign(&format!(
            "POST\n{content_md5}\n{content_type}\n{date}\n{resource}"
        ))?;

        let response = self
            .http
            .post(format!("https://{}/?delete", self.bucket_host(bucket)))
            .header("Date", &date)
            .header("Content-MD5", &content_md5)
            .header("Content-Type", content_type)
            .header("Authorization", self.authorization(&signature))
            .body(payload)
            .send()
            .await?;
        let (status, body) = Self::check(response).await?;

        let deleted = xml_blocks(&body, "Deleted")
            .into_iter()
            .filter_map(|block| xml_text(block, "Key"))
            .map(|key| DeletedObject {
                key: xml_unescape(key),
            })
            .collect();
        Ok(DeleteMultiResult { deleted, status })
    }

    fn signature_url(
        &self,
        bucket: &BucketIdentity,
        key: &str,
        options: &SignatureOptions,
    ) -> OssResult<String> {
        let expires = Utc::now().timestamp() + options.expires.unwrap_or(1800);
        let content_type = match options.method {
            SignMethod::Put => options.content_type.as_deref().unwrap_or(""),
            SignMethod::Get => "",
        };

        let mut resource = format!("/{}/{}", bucket.bucket_name, key);
        if let Some(process) = &options.process {
            resource.push_str(&format!("?x-oss-process={process}"));
        }
        let signature = self.sign(&format!(
            "{}\n\n{}\n{}\n{}",
            options.method.verb(),
            content_type,
            expires,
            resource
        ))?;

        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let mut url = format!(
            "https://{}/{}?OSSAccessKeyId={}&Expires={}&Signature={}",
            self.bucket_host(bucket),
            encoded_key,
            urlencoding::encode(&self.cfg.access_key_id),
            expires,
            urlencoding::encode(&signature)
        );
        if let Some(process) = &options.process {
            url.push_str(&format!("&x-oss-process={}", urlencoding::encode(process)));
        }
        Ok(url)
    }
}

/// Extract the text of the first `<tag>…</tag>` pair. The provider's
/// response bodies are small and flat.
fn xml_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

/// Collect the inner text of every `<tag>…</tag>` pair, in order.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else { break };
        blocks.push(&after[..end]);
        rest = &after[end + close.len()..];
    }
    blocks
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_text_picks_the_first_match() {
        let xml = "<DeleteResult><Deleted><Key>a.png</Key></Deleted></DeleteResult>";
        assert_eq!(xml_text(xml, "Key"), Some("a.png"));
        assert_eq!(xml_text(xml, "Missing"), None);
    }

    #[test]
    fn xml_blocks_walks_repeated_tags() {
        let xml = "<r><Deleted><Key>a</Key></Deleted><Deleted><Key>b</Key></Deleted></r>";
        let blocks = xml_blocks(xml, "Deleted");
        assert_eq!(blocks.len(), 2);
        assert_eq!(xml_text(blocks[0], "Key"), Some("a"));
        assert_eq!(xml_text(blocks[1], "Key"), Some("b"));
    }

    #[test]
    fn escape_round_trips() {
        let raw = r#"a&b<c>"d'"#;
        assert_eq!(xml_unescape(&xml_escape(raw)), raw);
    }

    fn client() -> OssClient {
        OssClient::new(OssConfig {
            access_key_id: "ak".into(),
            access_key_secret: "sk".into(),
            endpoint: "oss-cn-hangzhou.aliyuncs.com".into(),
        })
    }

    #[test]
    fn bucket_host_accepts_both_region_spellings() {
        let c = client();
        assert_eq!(
            c.bucket_host(&BucketIdentity::new("b", "cn-hangzhou")),
            "b.oss-cn-hangzhou.aliyuncs.com"
        );
        assert_eq!(
            c.bucket_host(&BucketIdentity::new("b", "oss-cn-shanghai")),
            "b.oss-cn-shanghai.aliyuncs.com"
        );
    }

    #[test]
    fn signature_url_carries_the_query_triplet() {
        let c = client();
        let url = c
            .signature_url(
                &BucketIdentity::new("assets", "cn-hangzhou"),
                "fe/logo 1.png",
                &SignatureOptions {
                    method: SignMethod::Put,
                    expires: Some(60),
                    content_type: Some("image/png".into()),
                    process: None,
                },
            )
            .unwrap();
        assert!(url.starts_with("https://assets.oss-cn-hangzhou.aliyuncs.com/fe/logo%201.png?"));
        assert!(url.contains("OSSAccessKeyId=ak"));
        assert!(url.contains("Expires="));
        assert!(url.contains("Signature="));
    }

    #[test]
    fn process_parameter_is_appended() {
        let c = client();
        let url = c
            .signature_url(
                &BucketIdentity::new("assets", "cn-hangzhou"),
                "fe/logo.png",
                &SignatureOptions {
                    method: SignMethod::Get,
                    expires: None,
                    content_type: None,
                    process: Some("image/resize,w_200".into()),
                },
            )
            .unwrap();
        assert!(url.contains("x-oss-process=image%2Fresize%2Cw_200"));
    }
}
