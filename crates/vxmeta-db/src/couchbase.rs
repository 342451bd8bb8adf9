use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vxmeta_core::config::{ConnectionTarget, Credentials};
use vxmeta_core::traits::{DocumentStore, RowStream};
use vxmeta_core::AppError;

const QUERY_PORT: u16 = 8093;
const QUERY_TLS_PORT: u16 = 18093;

/// Extra client-side time on top of the server-side query timeout, so the
/// server gets to report its own timeout first.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Maps a `cb_host` value to the Query Service base URL.
///
/// Accepts `couchbase://host`, `couchbases://host`, `http(s)://host[:port]`
/// or a bare host name. Couchbase connection strings may list several hosts
/// and carry options; the first host is used and options are dropped.
///
/// # Errors
///
/// Returns `AppError::Config` if no usable host can be extracted.
pub fn query_service_url(host: &str) -> Result<Url, AppError> {
    let host = host.trim();
    let invalid = || AppError::Config(format!("Invalid Couchbase host: '{host}'"));

    let (scheme, port, rest) = if let Some(rest) = host.strip_prefix("couchbases://") {
        ("https", Some(QUERY_TLS_PORT), rest)
    } else if let Some(rest) = host.strip_prefix("couchbase://") {
        ("http", Some(QUERY_PORT), rest)
    } else if host.starts_with("http://") || host.starts_with("https://") {
        return Url::parse(host).map_err(|_| invalid());
    } else {
        ("http", Some(QUERY_PORT), host)
    };

    let first = rest
        .split(['?', '/'])
        .next()
        .and_then(|hosts| hosts.split(',').next())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(invalid)?;
    // A port in a couchbase:// string names the KV service, not the query service.
    let name = first.split(':').next().unwrap_or(first);

    let mut url = Url::parse(&format!("{scheme}://{name}/")).map_err(|_| invalid())?;
    url.set_port(port).map_err(|_| invalid())?;
    Ok(url)
}

/// `UPSERT` statement writing `$doc` under `$id` into `target`.
pub fn upsert_statement(target: &ConnectionTarget) -> String {
    format!(
        "UPSERT INTO {} (KEY, VALUE) VALUES ($id, $doc)",
        target.namespace()
    )
}

/// Body of a `POST /query/service` request.
///
/// Named parameters travel as top-level `$name` fields.
#[derive(Serialize, Debug)]
struct QueryRequest<'a> {
    statement: &'a str,
    timeout: String,
    #[serde(flatten)]
    args: Map<String, Value>,
}

impl<'a> QueryRequest<'a> {
    fn new(statement: &'a str, timeout: Duration) -> Self {
        Self {
            statement,
            timeout: format!("{}s", timeout.as_secs().max(1)),
            args: Map::new(),
        }
    }

    fn arg(mut self, name: &str, value: Value) -> Self {
        self.args.insert(format!("${name}"), value);
        self
    }
}

#[derive(Deserialize, Debug)]
struct QueryError {
    code: i64,
    msg: String,
}

/// Query Service response.
///
/// ```json
/// {
///     "status": "success",
///     "results": [...],
///     "errors": [{"code": 3000, "msg": "..."}]
/// }
/// ```
#[derive(Deserialize, Debug)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<QueryError>,
}

impl QueryResponse {
    fn into_rows(self, timeout: Duration) -> Result<Vec<Value>, AppError> {
        match self.status.as_str() {
            "success" if self.errors.is_empty() => Ok(self.results),
            "timeout" => Err(AppError::Timeout {
                seconds: timeout.as_secs(),
            }),
            status => {
                let detail = self
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.msg))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(AppError::Query(format!("status {status}: {detail}")))
            }
        }
    }
}

fn request_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else if e.is_connect() {
        AppError::Connection(e.to_string())
    } else {
        AppError::Query(e.to_string())
    }
}

/// HTTP client for the Couchbase Query Service.
///
/// Every statement is sent ad hoc; nothing is prepared or cached on the
/// server.
///
/// # Examples
///
/// ```no_run
/// use vxmeta_core::Credentials;
/// use vxmeta_db::CouchbaseClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = Credentials::from_file("/home/amb-verif/credentials")?;
/// let target = credentials.target(None)?;
/// let client = CouchbaseClient::connect(&credentials, target).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CouchbaseClient {
    client: Client,
    base_url: Url,
    user: String,
    password: String,
    target: ConnectionTarget,
}

impl std::fmt::Debug for CouchbaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouchbaseClient")
            .field("base_url", &self.base_url.as_str())
            .field("user", &self.user)
            .field("target", &self.target)
            .finish()
    }
}

impl CouchbaseClient {
    /// Creates a client without contacting the server.
    ///
    /// # Arguments
    ///
    /// * `credentials` - Host and login
    /// * `target` - Keyspace metadata documents are upserted into
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the host is invalid.
    /// Returns `AppError::Connection` if the HTTP client cannot be built.
    pub fn new(credentials: &Credentials, target: ConnectionTarget) -> Result<Self, AppError> {
        let base_url = query_service_url(&credentials.cb_host)?;
        let client = Client::builder()
            .user_agent(concat!("vxmeta/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            user: credentials.cb_user.clone(),
            password: credentials.cb_password.clone(),
            target,
        })
    }

    /// Creates a client and waits for the Query Service to answer a ping.
    pub async fn connect(
        credentials: &Credentials,
        target: ConnectionTarget,
    ) -> Result<Self, AppError> {
        let client = Self::new(credentials, target)?;
        client.ping().await?;
        tracing::info!(
            url = %client.base_url,
            target = %client.target.namespace(),
            "Connected to query service"
        );
        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// Readiness check against `/admin/ping`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` if the service is unreachable or
    /// answers with a non-success status.
    pub async fn ping(&self) -> Result<(), AppError> {
        let resp = self
            .client
            .get(self.endpoint("admin/ping")?)
            .basic_auth(&self.user, Some(&self.password))
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("{}: {e}", self.base_url)))?;

        if !resp.status().is_success() {
            return Err(AppError::Connection(format!(
                "Query service not ready: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        request: QueryRequest<'_>,
        timeout: Duration,
    ) -> Result<Vec<Value>, AppError> {
        let resp = self
            .client
            .post(self.endpoint("query/service")?)
            .basic_auth(&self.user, Some(&self.password))
            .timeout(timeout + TIMEOUT_GRACE)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::Connection(format!(
                "Authentication failed for user {}: HTTP {status}",
                self.user
            )));
        }

        // Query errors come back as JSON with a 4xx/5xx status.
        let body: QueryResponse = resp.json().await.map_err(|e| {
            AppError::Query(format!("Unreadable query response (HTTP {status}): {e}"))
        })?;
        body.into_rows(timeout)
    }
}

impl DocumentStore for CouchbaseClient {
    /// The response is buffered by the HTTP client and then yielded row by row.
    async fn query(&self, statement: &str, timeout: Duration) -> Result<RowStream, AppError> {
        let rows = self
            .execute(QueryRequest::new(statement, timeout), timeout)
            .await?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn upsert(&self, id: &str, document: &Value, timeout: Duration) -> Result<(), AppError> {
        let statement = upsert_statement(&self.target);
        let request = QueryRequest::new(&statement, timeout)
            .arg("id", Value::from(id))
            .arg("doc", document.clone());
        self.execute(request, timeout).await?;
        tracing::debug!(id, "Upserted document");
        Ok(())
    }
}
