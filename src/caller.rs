//! Call Adapter: a thin wrapper tying a node to its caller (forward action)
//! and optional revert (compensating action). The same trait shape backs
//! both slots, mirroring the `Call`/`Revert` polymorphism a node's two
//! call sites share.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::manager::Context;
use crate::store::ReferenceStore;

/// A business caller, invoked by the Flow Manager at the node's turn.
#[async_trait]
pub trait Caller: Send + Sync {
    async fn do_call(&self, ctx: &Context, store: &ReferenceStore) -> anyhow::Result<()>;
}

/// Demo transport used by the CLI and integration tests in place of a real
/// HTTP/gRPC client (out of scope per the purpose-and-scope boundary).
/// Simulates network latency and writes a fixed response under its node's
/// resource name.
pub struct StubCaller {
    pub node: String,
    pub fail: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl StubCaller {
    pub fn new(node: impl Into<String>) -> Self {
        StubCaller {
            node: node.into(),
            fail: false,
            min_delay_ms: 5,
            max_delay_ms: 20,
        }
    }

    pub fn failing(node: impl Into<String>) -> Self {
        StubCaller {
            node: node.into(),
            fail: true,
            min_delay_ms: 5,
            max_delay_ms: 20,
        }
    }
}

#[async_trait]
impl Caller for StubCaller {
    async fn do_call(&self, ctx: &Context, store: &ReferenceStore) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            anyhow::bail!("cancelled before node '{}' ran", self.node);
        }

        let delay_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.min_delay_ms..=self.max_delay_ms.max(self.min_delay_ms))
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        if self.fail {
            anyhow::bail!("simulated failure in node '{}'", self.node);
        }

        store.store(
            &self.node,
            "status",
            crate::property::Value::String("ok".to_string()),
        );
        Ok(())
    }
}
