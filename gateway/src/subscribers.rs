use crate::stats::StatsReport;
use async_trait::async_trait;
use std::time::Duration;

/// Receiver of statistics pushes. A subscriber whose push fails is dropped.
#[async_trait]
pub trait StatsSubscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn push(&self, report: &StatsReport) -> anyhow::Result<()>;
}

/// Pushes reports as JSON to a callback URL.
pub struct HttpSubscriber {
    callback: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSubscriber {
    pub fn new(callback: impl Into<String>, client: reqwest::Client, timeout: Duration) -> Self {
        Self { callback: callback.into(), client, timeout }
    }
}

#[async_trait]
impl StatsSubscriber for HttpSubscriber {
    fn name(&self) -> &str {
        &self.callback
    }

    async fn push(&self, report: &StatsReport) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.callback)
            .json(report)
            .timeout(self.timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("callback returned {}", resp.status());
        }
        Ok(())
    }
}
