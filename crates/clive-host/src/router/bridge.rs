//! `bridge.*`: lifecycle status of the host's bridge.

use clive_bridge::BridgeStatus;
use clive_rpc::{RouterBuildError, RpcError, procedure};
use futures::StreamExt;
use tracing::info;

use super::{AppRouter, bridge_error};
use crate::context::RequestContext;

/// `status`, `onStatusChange`, `restart`.
pub fn router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .procedure(
            "status",
            procedure::<RequestContext>().query(|(), ctx: RequestContext| async move {
                ctx.bridge.status().map_err(|e| bridge_error(&e))
            }),
        )
        .procedure(
            "onStatusChange",
            procedure::<RequestContext>().subscription(|(), ctx: RequestContext| async move {
                let statuses = ctx.bridge.subscribe().map_err(|e| bridge_error(&e))?;
                Ok(statuses.map(Ok::<BridgeStatus, RpcError>))
            }),
        )
        .procedure(
            "restart",
            procedure::<RequestContext>().mutation(|(), ctx: RequestContext| async move {
                let socket_path = ctx.bridge.restart().await.map_err(|e| bridge_error(&e))?;
                info!(socket_path = %socket_path.display(), "bridge restarted on request");
                ctx.bridge.status().map_err(|e| bridge_error(&e))
            }),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::test_support::Fixture;
    use clive_rpc::ProcedureKind;
    use clive_tools::testutil::ScriptedSpawner;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn status_reports_idle_before_start() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let out = router()
            .unwrap()
            .call("status", ProcedureKind::Query, Value::Null, fx.ctx())
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({"bridgeReady": false, "starting": false, "error": null, "socketPath": null})
        );
    }

    #[tokio::test]
    async fn restart_binds_a_fresh_socket() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let first = fx.state.bridge.start().await.unwrap();
        let out = router()
            .unwrap()
            .call("restart", ProcedureKind::Mutation, Value::Null, fx.ctx())
            .await
            .unwrap();
        assert_eq!(out["bridgeReady"], json!(true));
        let second = out["socketPath"].as_str().unwrap();
        assert_ne!(second, first.to_str().unwrap());
        assert!(!first.exists());
        fx.state.bridge.dispose_now().unwrap();
    }

    #[tokio::test]
    async fn status_stream_starts_with_snapshot_and_follows_start() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let mut statuses = router()
            .unwrap()
            .subscribe("onStatusChange", Value::Null, fx.ctx())
            .await
            .unwrap();
        assert_eq!(statuses.next().await.unwrap().unwrap()["bridgeReady"], json!(false));

        let _ = fx.state.bridge.start().await.unwrap();
        assert_eq!(statuses.next().await.unwrap().unwrap()["starting"], json!(true));
        assert_eq!(statuses.next().await.unwrap().unwrap()["bridgeReady"], json!(true));

        fx.state.bridge.dispose_now().unwrap();
        while let Some(item) = statuses.next().await {
            let _ = item.unwrap();
        }
    }

    #[tokio::test]
    async fn disposed_bridge_is_a_resolver_error() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        fx.state.bridge.dispose_now().unwrap();
        let err = router()
            .unwrap()
            .call("status", ProcedureKind::Query, Value::Null, fx.ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), clive_rpc::errors::RESOLVER);
        assert_eq!(err.to_error_body().details, Some(json!({"code": "DISPOSED"})));
    }
}
