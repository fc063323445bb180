//! jAccount single sign-on and the Canvas session cache

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT_LANGUAGE, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client, StatusCode};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{HarvestError, Result};

const OAUTH_LOGIN_URL: &str = "https://courses.sjtu.edu.cn/app/oauth/2.0/login?login_type=outer";
const CANVAS_OPENID_URL: &str = "https://oc.sjtu.edu.cn/login/openid_connect";
const CANVAS_HOME_URL: &str = "https://oc.sjtu.edu.cn/";
const JACCOUNT_CAPTCHA_URL: &str = "https://jaccount.sjtu.edu.cn/jaccount/captcha";
const JACCOUNT_ULOGIN_URL: &str = "https://jaccount.sjtu.edu.cn/jaccount/ulogin";
const JACCOUNT_REJECTED_PREFIX: &str = "https://jaccount.sjtu.edu.cn/jaccount/jalogin";

/// Authenticated portal state: the cookie jar and a client bound to it.
///
/// Clones share the same jar.
#[derive(Clone)]
pub struct SessionHandle {
    jar: Arc<Jar>,
    client: Client,
}

impl SessionHandle {
    /// Wrap an existing cookie jar
    pub fn from_jar(jar: Arc<Jar>) -> Result<Self> {
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        Ok(Self { jar, client })
    }

    /// A handle with an empty jar
    pub fn fresh() -> Result<Self> {
        Self::from_jar(Arc::new(Jar::default()))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Lightweight authenticated request; a redirect means the session is gone
    pub async fn is_alive(&self) -> bool {
        let checker = match Client::builder()
            .cookie_provider(Arc::clone(&self.jar))
            .redirect(redirect::Policy::none())
            .build()
        {
            Ok(client) => client,
            Err(_) => return false,
        };

        match checker.get(CANVAS_HOME_URL).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Session check failed: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionHandle { .. }")
    }
}

/// Anything that can hand out a valid portal session
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn login(&self) -> Result<SessionHandle>;
}

/// Turns a captcha image into its text
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: Vec<u8>) -> Result<String>;
}

/// Captcha solver backed by a remote HTTP service
pub struct HttpCaptchaSolver {
    endpoint: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SolverResponse {
    result: String,
}

impl HttpCaptchaSolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    async fn solve(&self, image: Vec<u8>) -> Result<String> {
        let form = Form::new().part("image", Part::bytes(image).file_name("captcha.jpg"));

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| HarvestError::authentication(format!("captcha solver unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(HarvestError::authentication(format!(
                "captcha solver returned {}",
                response.status()
            )));
        }

        let solved: SolverResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::authentication(format!("captcha solving failed: {}", e)))?;
        Ok(solved.result)
    }
}

/// Owns the credentials and the one cached portal session
pub struct SessionManager {
    username: String,
    password: String,
    solver: Box<dyn CaptchaSolver>,
    cached: Mutex<Option<SessionHandle>>,
}

impl SessionManager {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        solver: Box<dyn CaptchaSolver>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            solver,
            cached: Mutex::new(None),
        }
    }

    /// Manager using the HTTP captcha solver at `solver_url`
    pub fn with_http_solver(
        username: impl Into<String>,
        password: impl Into<String>,
        solver_url: &str,
    ) -> Self {
        Self::new(username, password, Box::new(HttpCaptchaSolver::new(solver_url)))
    }

    async fn authenticate(&self) -> Result<SessionHandle> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(HarvestError::authentication("username and password are required"));
        }

        let session = SessionHandle::fresh()?;
        let client = session.client();

        // Login form: one-time token plus the OAuth parameters carried in the final URL
        let response = client
            .get(OAUTH_LOGIN_URL)
            .header(ACCEPT_LANGUAGE, "zh-CN")
            .send()
            .await
            .map_err(auth_http("login page"))?;
        let login_url = response.url().clone();
        let params: Vec<(String, String)> = login_url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let page = response.text().await.map_err(auth_http("login page"))?;
        let token = extract_form_token(&page)?;
        debug!("Obtained login token from {}", login_url);

        let image = fetch_captcha(client, &token, &login_url).await?;
        let answer = self.solver.solve(image).await?;

        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut form = vec![
            ("user".to_string(), self.username.clone()),
            ("pass".to_string(), self.password.clone()),
            ("uuid".to_string(), token),
            ("captcha".to_string(), answer),
        ];
        form.extend(params);

        let response = client
            .post(JACCOUNT_ULOGIN_URL)
            .header(ACCEPT_LANGUAGE, "zh-CN")
            .form(&form)
            .send()
            .await
            .map_err(auth_http("credential submission"))?;
        if is_rejected(response.url()) {
            return Err(HarvestError::authentication(
                "jAccount rejected the credentials or captcha",
            ));
        }

        let response = client
            .get(CANVAS_OPENID_URL)
            .header(ACCEPT_LANGUAGE, "zh-CN")
            .send()
            .await
            .map_err(auth_http("Canvas federation"))?;
        if !response.status().is_success() {
            return Err(HarvestError::authentication(format!(
                "Canvas federation returned {}",
                response.status()
            )));
        }

        Ok(session)
    }
}

#[async_trait]
impl SessionProvider for SessionManager {
    async fn login(&self) -> Result<SessionHandle> {
        let mut cached = self.cached.lock().await;

        if let Some(session) = cached.as_ref() {
            if session.is_alive().await {
                return Ok(session.clone());
            }
            warn!("Cached session expired, logging in again");
        }

        let session = self.authenticate().await?;
        info!("🔑 Logged in as {}", self.username);
        *cached = Some(session.clone());
        Ok(session)
    }
}

async fn fetch_captcha(client: &Client, token: &str, referer: &Url) -> Result<Vec<u8>> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string();

    let response = client
        .get(JACCOUNT_CAPTCHA_URL)
        .query(&[("uuid", token), ("t", millis.as_str())])
        .header(REFERER, referer.as_str())
        .send()
        .await
        .map_err(auth_http("captcha image"))?;

    let bytes = response.bytes().await.map_err(auth_http("captcha image"))?;
    Ok(bytes.to_vec())
}

/// Pull the hidden `uuid` input out of the login page
fn extract_form_token(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"input[type="hidden"][name="uuid"]"#)
        .map_err(|e| HarvestError::authentication(format!("invalid selector: {:?}", e)))?;

    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
        .ok_or_else(|| HarvestError::authentication("login form token not found"))
}

fn is_rejected(url: &Url) -> bool {
    url.as_str().starts_with(JACCOUNT_REJECTED_PREFIX)
}

fn auth_http(step: &'static str) -> impl Fn(reqwest::Error) -> HarvestError {
    move |e| HarvestError::authentication(format!("{} request failed: {}", step, e))
}
