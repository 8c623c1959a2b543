//! kubelift - export the resolved Kubernetes credential as a portable,
//! proxy-ready kubeconfig.
//!
//! The binary drives the library pipeline in data-flow order: resolve the
//! credential, optionally exchange it for a service account token, rewrite
//! a loopback API server host to an /etc/hosts alias, verify the configured
//! proxy can stream watch responses, and emit the artifact.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use kubelift_client::export::{
    ExportOptions, ca_bundle, client_cert_bundle, kubeconfig_from_credentials,
};
use kubelift_client::hosts::{DEFAULT_HOSTS_PATH, loopback_alias, rewrite_loopback};
use kubelift_client::probe::{ProbeConfig, ProbeOutcome, fetch_proxy_ca, probe_streaming};
use kubelift_client::resolver::{ResolveEnv, ResolveOptions, resolve};
use kubelift_client::{KubeApiClient, SecretCaPolicy, exchange_service_account_spec};
use kubelift_common::Material;

/// User agent stamped on API requests made during resolution.
const USER_AGENT: &str = "kubelift";

const STREAMING_REMEDIATION: &str = "\
the proxy does not support streaming responses.
If you are using mitmproxy, you can enable streaming by using a custom script with the flag '-s':
    mitmproxy -s <(curl -L https://raw.githubusercontent.com/windowlickers/kubelift/main/watch-stream.py)";

const NO_ALIAS_WARNING: &str = "\
no 127.0.0.1 alias found in /etc/hosts other than \"localhost\". If
a Go client such as kubectl dials \"127.0.0.1\" or \"localhost\", Go
will ignore the HTTPS_PROXY env var.

To fix this issue, run the following command:
    sudo tee -a /etc/hosts <<<\"127.0.0.1 me\"";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the kubeconfig file to use.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// The name of the kubeconfig context to use.
    #[arg(long)]
    context: Option<String>,

    /// The container root. You can also set CONTAINER_ROOT instead. If
    /// TELEPRESENCE_ROOT is set, it will default to that.
    #[arg(long, env = "CONTAINER_ROOT", default_value = "")]
    root: String,

    /// Instead of the resolved identity, use the token and ca.crt of the
    /// given service account, for example 'namespace-1/serviceaccount-1'.
    /// Useful when you want to force a token (only available with service
    /// accounts) over client certificates, since a token is passed as a
    /// header that a proxy like mitmproxy can observe, rather than as a TLS
    /// client certificate.
    #[arg(long, visible_alias = "sa")]
    serviceaccount: Option<String>,

    /// Also require and apply the 'ca.crt' key of the service account token
    /// secret.
    #[arg(long, requires = "serviceaccount")]
    require_secret_ca: bool,

    /// Instead of the CA bundle resolved from /var/run/secrets or the
    /// kubeconfig, use this one. Useful when using a proxy like mitmproxy.
    #[arg(long)]
    replace_ca_cert: Option<PathBuf>,

    /// Instead of printing a kubeconfig, print the content of the
    /// client-key-data followed by the client-certificate-data.
    #[arg(long, conflicts_with = "print_ca_cert")]
    print_client_cert: bool,

    /// Instead of printing a kubeconfig, print the content of the
    /// certificate-authority-data.
    #[arg(long)]
    print_ca_cert: bool,

    /// Write the output to this path instead of standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print debug logs.
    #[arg(short = 'd', long)]
    debug: bool,
}

/// Initializes tracing on stderr so logs never mix into the emitted
/// artifact.
///
/// The level defaults to `info`, raised to `debug` by `-d`; `RUST_LOG`
/// overrides both.
fn init_tracing(debug: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    // --root beats CONTAINER_ROOT (clap env default) beats TELEPRESENCE_ROOT.
    let root = if args.root.is_empty() {
        env::var("TELEPRESENCE_ROOT").unwrap_or_default()
    } else {
        args.root.clone()
    };

    let proxy = env::var("HTTPS_PROXY").ok().filter(|value| !value.is_empty());

    let proxy_ca = match &proxy {
        Some(proxy_url) => match fetch_proxy_ca(proxy_url).await {
            Ok(pem) => Some(pem),
            Err(err) => {
                debug!("fetching the CA certificate from the proxy: {err}");
                None
            }
        },
        None => None,
    };

    let resolve_env = ResolveEnv::from_env(root);
    let options = ResolveOptions {
        kubeconfig: args.kubeconfig.clone(),
        context: args.context.clone(),
        user_agent: USER_AGENT.to_string(),
    };

    let mut credentials = resolve(&options, &resolve_env)
        .context("loading")?
        .into_credentials();

    if let Some(spec) = &args.serviceaccount {
        // The exchange must run with the unmodified credential;
        // `credentials` is the copy that gets customized below. The API
        // client it builds bypasses HTTPS_PROXY, which is not usable until
        // this very invocation finishes configuring it.
        let base = resolve(&options, &resolve_env)
            .context("loading")?
            .into_credentials();
        let api = KubeApiClient::new(&base)?;
        let policy = if args.require_secret_ca {
            SecretCaPolicy::RequireCa
        } else {
            SecretCaPolicy::TokenOnly
        };
        let sa_credentials = exchange_service_account_spec(&api, spec, policy)
            .await
            .context("while processing flag --serviceaccount")?;
        credentials.set_bearer_token(sa_credentials.token.expose_secret());
        if let Some(ca) = sa_credentials.ca {
            credentials.trust_anchor = Material::inline(ca);
        }
    }

    if let Some(proxy_url) = &proxy {
        if credentials.is_loopback_server() {
            match loopback_alias(Path::new(DEFAULT_HOSTS_PATH))? {
                Some(alias) => {
                    debug!("using the alias {alias:?} for the loopback API server host");
                    credentials.server = rewrite_loopback(&credentials.server, &alias);
                }
                None => warn!("{NO_ALIAS_WARNING}"),
            }
        }

        match probe_streaming(&ProbeConfig::new(proxy_url)).await? {
            ProbeOutcome::StreamingSupported => {}
            ProbeOutcome::ProxyUnreachable { detail } => bail!(
                "the env var HTTPS_PROXY is set to {proxy_url:?}, but the proxy doesn't seem to be running: {detail}"
            ),
            ProbeOutcome::StreamingUnsupported => bail!("{STREAMING_REMEDIATION}"),
            ProbeOutcome::Inconclusive { detail } => bail!(
                "checking whether the proxy supports response streaming using a throwaway streaming server: {detail}"
            ),
        }
    }

    let export_options = ExportOptions {
        replace_ca: args.replace_ca_cert.clone(),
        proxy_ca,
    };

    let output = if args.print_client_cert {
        client_cert_bundle(&credentials)
            .context("building the PEM bundle with the client-key-data and client-certificate-data")?
    } else if args.print_ca_cert {
        ca_bundle(&credentials, &export_options)
            .context("building the PEM bundle with the certificate-authority-data")?
    } else {
        let config = kubeconfig_from_credentials(&credentials, &export_options)
            .context("building the kubeconfig")?;
        config
            .to_yaml()
            .context("serializing the kubeconfig")?
            .into_bytes()
    };

    match &args.output {
        Some(path) => std::fs::write(path, &output)
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&output)
            .context("writing to stdout")?,
    }

    Ok(())
}
