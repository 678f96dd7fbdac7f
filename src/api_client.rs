use crate::config::PipelineConfig;
use crate::error::{Error, AUTH_ERROR_CODES};
use crate::secrets::Credentials;
use crate::table::{Entity, MetadataKind};
use chrono::NaiveDate;
use log::debug;
use reqwest::{header::AUTHORIZATION, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

const PAGE_LIMIT: &str = "500";

const INSIGHT_FIELDS: &[&str] = &[
    "account_id",
    "campaign_id",
    "adset_id",
    "ad_id",
    "spend",
    "impressions",
    "clicks",
    "reach",
    "optimization_goal",
    "actions",
];

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AdsApi: Send + Sync + 'static {
    /// Fetches the display name of the configured ad account.
    /// # Returns
    /// A Result containing the name, `None` when the API returns none, or an Error.
    async fn fetch_account_name(&self) -> Result<Option<String>, Error>;

    /// Fetches daily insight rows at the given level, following every result page.
    /// # Arguments
    /// * `level` - The entity level the rows are broken down by.
    /// * `since` - The first day of the range, inclusive.
    /// * `until` - The last day of the range, inclusive.
    /// # Returns
    /// A Result containing either one `InsightRow` per entity and day or an Error.
    /// Errors are classified so the caller can tell expired credentials, retryable
    /// and fatal failures apart.
    async fn fetch_insights(
        &self,
        level: Entity,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<InsightRow>, Error>;

    /// Fetches the descriptive fields of a single entity.
    /// # Arguments
    /// * `kind` - The kind of entity. Creatives are looked up by ad id.
    /// * `id` - The entity id.
    /// # Returns
    /// A Result containing either the JSON object returned for the entity or an Error.
    async fn fetch_metadata(&self, kind: MetadataKind, id: &str)
        -> Result<Map<String, Value>, Error>;
}

/// One insights row as returned by the Graph API. Numbers arrive as strings.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InsightRow {
    pub account_id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    pub date_start: String,
    pub date_stop: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub spend: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub impressions: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub clicks: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub reach: Option<i64>,
    #[serde(default)]
    pub optimization_goal: Option<String>,
    #[serde(default)]
    pub actions: Option<Value>,
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Turns a non-success response into a classified error.
pub fn classify_response(status: StatusCode, body: &str) -> Error {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (None, body.chars().take(200).collect()),
    };

    let auth = status == StatusCode::UNAUTHORIZED
        || code.is_some_and(|code| AUTH_ERROR_CODES.contains(&code));
    if auth {
        Error::AuthExpired { code, message }
    } else {
        Error::Upstream {
            status: status.as_u16(),
            code,
            message,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    version: String,
    token: String,
    account_id: String,
}

impl ApiClient {
    pub fn new(config: &PipelineConfig, credentials: Credentials) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.api_timeout).build()?;
        Ok(ApiClient {
            client,
            base_url: config.api_url.clone(),
            version: config.api_version.clone(),
            token: credentials.access_token,
            account_id: credentials.account_id,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .push(&self.version)
            .extend(segments);
        Ok(url)
    }

    fn account_node(&self) -> String {
        format!("act_{}", self.account_id)
    }

    fn insights_url(&self, level: Entity, since: NaiveDate, until: NaiveDate) -> Result<Url, Error> {
        let time_range = serde_json::json!({
            "since": since.format("%Y-%m-%d").to_string(),
            "until": until.format("%Y-%m-%d").to_string(),
        });

        let node = self.account_node();
        let mut url = self.url(&[node.as_str(), "insights"])?;
        url.query_pairs_mut()
            .append_pair("level", level.as_str())
            .append_pair("time_increment", "1")
            .append_pair("time_range", &time_range.to_string())
            .append_pair("fields", &INSIGHT_FIELDS.join(","))
            .append_pair("limit", PAGE_LIMIT);
        Ok(url)
    }

    fn metadata_url(&self, kind: MetadataKind, id: &str) -> Result<Url, Error> {
        let fields = match kind {
            MetadataKind::Campaign => "id,name,status,effective_status,objective,configured_status",
            MetadataKind::Adset => "id,name,status,effective_status,campaign_id,optimization_goal",
            MetadataKind::Ad => "id,name,status,effective_status,adset_id,campaign_id",
            MetadataKind::Creative => "id,creative{id,name,thumbnail_url}",
        };

        let mut url = self.url(&[id])?;
        url.query_pairs_mut().append_pair("fields", fields);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        match resp.status() {
            status if status.is_success() => Ok(resp.json::<T>().await?),
            status => Err(classify_response(status, &resp.text().await?)),
        }
    }
}

#[async_trait::async_trait]
impl AdsApi for ApiClient {
    async fn fetch_account_name(&self) -> Result<Option<String>, Error> {
        let node = self.account_node();
        let mut url = self.url(&[node.as_str()])?;
        url.query_pairs_mut().append_pair("fields", "name");

        let account: Map<String, Value> = self.get_json(url).await?;
        Ok(account
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn fetch_insights(
        &self,
        level: Entity,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<InsightRow>, Error> {
        let mut rows = Vec::new();
        let mut next = Some(self.insights_url(level, since, until)?);

        while let Some(url) = next.take() {
            let page: Page<InsightRow> = self.get_json(url).await?;
            debug!("Fetched {} {} insight row(s)", page.data.len(), level);
            rows.extend(page.data);

            if let Some(link) = page.paging.and_then(|p| p.next) {
                next = Some(Url::parse(&link)?);
            }
        }

        Ok(rows)
    }

    async fn fetch_metadata(
        &self,
        kind: MetadataKind,
        id: &str,
    ) -> Result<Map<String, Value>, Error> {
        self.get_json(self.metadata_url(kind, id)?).await
    }
}
