/// Where the front-end is running, relative to the inference server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Loopback host: the endpoint is expected to be reachable.
    Local,
    /// Hosted or preview deployment: the endpoint is expected to be unreachable.
    RemotePreview,
}

impl Environment {
    pub fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Classifies the execution host. Consulted once per cycle, never cached.
pub trait EnvironmentClassifier: Send + Sync {
    fn classify(&self) -> Environment;
}

pub fn classify_host(host: &str) -> Environment {
    let host = host.trim();
    if host.eq_ignore_ascii_case("localhost")
        || host == "127.0.0.1"
        || host == "::1"
        || host == "[::1]"
    {
        Environment::Local
    } else {
        Environment::RemotePreview
    }
}

/// Classifies a fixed host name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHost(pub String);

impl EnvironmentClassifier for StaticHost {
    fn classify(&self) -> Environment {
        classify_host(&self.0)
    }
}

/// Always reports the same environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedEnvironment(pub Environment);

impl EnvironmentClassifier for FixedEnvironment {
    fn classify(&self) -> Environment {
        self.0
    }
}

/// Lines shown in an empty log panel before the first cycle.
pub fn startup_banner(environment: Environment, server_address: &str) -> Vec<String> {
    match environment {
        Environment::Local => vec![
            "Running on localhost".to_string(),
            format!("Will attempt to connect to LLM server at {server_address}"),
            "Make sure your local LLM server is running".to_string(),
        ],
        Environment::RemotePreview => vec![
            "Running in preview/production environment".to_string(),
            format!("Local LLM server at {server_address} won't be accessible"),
            "Using mock response mode for demonstration".to_string(),
            "To use with a real LLM server, run this app locally".to_string(),
        ],
    }
}
