use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, Error};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

pub struct HttpClient;

impl HttpClient {
    pub fn default_user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    fn base_builder(timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(Self::default_user_agent())
            .timeout(timeout)
            .cookie_store(true)
    }

    pub fn new() -> Result<Client, Error> {
        Self::base_builder(DEFAULT_TIMEOUT).build()
    }

    pub fn with_timeout(timeout: Duration) -> Result<Client, Error> {
        Self::base_builder(timeout).build()
    }

    /// Client bound to a specific local egress address.
    pub fn with_local_address(addr: IpAddr, timeout: Duration) -> Result<Client, Error> {
        Self::base_builder(timeout).local_address(addr).build()
    }

    /// Client routed through an HTTP(S) proxy, optionally authenticated.
    pub fn with_proxy(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Client, Error> {
        let mut proxy = reqwest::Proxy::all(url)?;
        if let (Some(user), Some(pass)) = (username, password) {
            proxy = proxy.basic_auth(user, pass);
        }
        Self::base_builder(timeout).proxy(proxy).build()
    }
}
