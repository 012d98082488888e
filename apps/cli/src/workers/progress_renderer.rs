use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use slidecast_core::{
    events::{EnrichedEvent, EventBus, downcast_ref},
    queues::QueueKind,
    workers::{ChunkProgressed, InputSpec, SubscriptionSpec, Worker, WorkerFailed, WorkflowUpdated},
    workflow::{OperationStatus, Workflow, WorkflowStatus},
};

/// Draws the running workflow as a single progress bar on stderr.
pub struct ProgressRendererWorker {
    bar: ProgressBar,
    chunk_progress: Option<(usize, f64)>,
}

impl ProgressRendererWorker {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .expect("hardcoded progress bar template")
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            chunk_progress: None,
        }
    }

    fn render(&mut self, workflow: &Workflow) {
        self.bar.set_position(workflow.progress.floor() as u64);

        if workflow.is_terminal() {
            let mark = match workflow.status {
                WorkflowStatus::Completed => style("✓").green().bold(),
                WorkflowStatus::Cancelled => style("■").yellow().bold(),
                _ => style("✗").red().bold(),
            };
            let outcome = workflow
                .outcome
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("{:?}", workflow.status).to_lowercase());
            self.bar.finish_with_message(format!("{mark} {outcome}"));
            return;
        }

        let current = workflow
            .operations
            .iter()
            .rev()
            .find(|op| op.status == OperationStatus::Running)
            .or_else(|| {
                workflow
                    .operations
                    .iter()
                    .find(|op| op.status == OperationStatus::Pending)
            });

        if let Some(op) = current {
            let mut msg = format!("{}: {}", style(&op.label).bold(), op.message);
            if op.label == "upload"
                && let Some((index, pct)) = self.chunk_progress
            {
                msg.push_str(&format!(" {}", style(format!("(chunk {} at {:.0}%)", index + 1, pct)).dim()));
            }
            self.bar.set_message(msg);
        }
    }
}

impl Default for ProgressRendererWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for ProgressRendererWorker {
    const SUBSCRIBER_ID: &'static str = "cli.progress_renderer";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![
                InputSpec {
                    event_type: WorkflowUpdated::EVENT_TYPE,
                    queue_kind: QueueKind::Latest1,
                },
                InputSpec {
                    event_type: ChunkProgressed::EVENT_TYPE,
                    queue_kind: QueueKind::Latest1,
                },
                InputSpec {
                    event_type: WorkerFailed::EVENT_TYPE,
                    queue_kind: QueueKind::FifoDropOldest { capacity: 16 },
                },
            ],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, _bus: &EventBus) -> Result<()> {
        if let Some(chunk) = downcast_ref::<ChunkProgressed>(&event.event) {
            self.chunk_progress = Some((chunk.chunk_index, chunk.progress));
        }

        if let Some(updated) = downcast_ref::<WorkflowUpdated>(&event.event) {
            self.render(&updated.workflow);
        }

        if let Some(failed) = downcast_ref::<WorkerFailed>(&event.event) {
            self.bar.println(format!(
                "{} {} failed: {}",
                style("!").red().bold(),
                failed.stage,
                failed.message
            ));
        }

        Ok(())
    }

    async fn finish(&mut self, _bus: &EventBus) -> Result<()> {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
        Ok(())
    }
}
