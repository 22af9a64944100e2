use axum::routing::post;
use axum::{Json, Router};
use ispapp_config::{keys, ConfigStore};
use ispapp_session::{AuthPath, ConnectionState, Service, SessionConfig, StartupError};
use serde_json::{json, Value};
use tokio::net::TcpListener;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const SETTINGS: &str = "\
# ispapp agent settings
package ispapp

config settings
\toption login '00:11:22:33:44:55'
\toption Domain 'example.ispapp.co'
\toption ListenerPort '8443'
\toption Key 'secret123'
\toption UpdateInterval '45'
";

async fn ubus(Json(request): Json<Value>) -> Json<Value> {
    let result = match request["params"][2].as_str() {
        Some("signup") => json!([0, {
            "code": 200,
            "body": "{\"accessToken\":\"a1\",\"refreshToken\":\"r1\"}",
        }]),
        Some("checkconnection") => json!([0, { "code": 200 }]),
        _ => json!([3]),
    };
    let id = request["id"].clone();
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn stub_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let router = Router::new().route("/ubus", post(ubus));
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}/ubus")
}

fn session_config(ubus_url: String, config_path: std::path::PathBuf) -> SessionConfig {
    SessionConfig {
        ubus_url,
        ubus_session: "00000000000000000000000000000000".into(),
        rpc_timeout_ms: 5_000,
        config_path,
        log_filter: "ispapp_session=debug".into(),
    }
}

#[tokio::test]
async fn start_wires_settings_file_transport_and_poller() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ispapp");
    tokio::fs::write(&path, SETTINGS).await?;
    let config = session_config(stub_endpoint().await, path.clone());

    let service = Service::start(&config).await?;
    assert_eq!(service.poller().config().interval_secs(), 45);
    let session = service.session();
    assert_eq!(session.credentials().domain, "example.ispapp.co");
    assert!(!session.credentials().is_registered());

    assert_eq!(session.ensure_registered().await?, AuthPath::SignedUp);
    assert_eq!(session.current_state(), ConnectionState::Connected);
    assert_eq!(
        service.store().get(keys::ACCESS_TOKEN).await.as_deref(),
        Some("a1")
    );

    let raw = tokio::fs::read_to_string(&path).await?;
    assert!(raw.starts_with("# ispapp agent settings\npackage ispapp\n"));
    assert!(raw.contains("\toption accessToken 'a1'\n"));
    assert!(raw.contains("\toption refreshToken 'r1'\n"));

    service.shutdown().await;

    // A restart picks the tokens up without another signup.
    let service = Service::start(&config).await?;
    assert_eq!(service.session().ensure_registered().await?, AuthPath::Stored);
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_settings_file_starts_unregistered() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = session_config(stub_endpoint().await, dir.path().join("ispapp"));

    let service = Service::start(&config).await?;
    assert_eq!(service.poller().config().interval_secs(), 30);
    assert_eq!(
        service.session().current_state(),
        ConnectionState::Unregistered
    );
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn invalid_ubus_url_fails_startup() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = session_config("not a url".into(), dir.path().join("ispapp"));

    let err = Service::start(&config).await.err().expect("startup must fail");
    assert!(matches!(err, StartupError::Transport(_)));
    Ok(())
}

#[tokio::test]
async fn unreadable_settings_fail_startup() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ispapp");
    tokio::fs::write(&path, "config settings\n\toption Key 'unterminated\n").await?;
    let config = session_config("http://127.0.0.1:9/ubus".into(), path);

    let err = Service::start(&config).await.err().expect("startup must fail");
    assert!(matches!(err, StartupError::Store(_)));
    Ok(())
}
