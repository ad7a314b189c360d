//! Everything a stage may use while it runs.

use crate::adapters::{AdapterSet, GenerationRequest};
use crate::cancellation::CancellationToken;
use crate::config::ArticleConfig;
use crate::core::StageKind;
use crate::engine::{with_retry, RetryConfig};
use crate::errors::{AdapterError, TemplateError};
use crate::events::{ProgressEvent, ProgressLog};
use crate::state::ReadView;
use crate::templates::{PromptTemplates, TemplateVars};

/// Appends `StageProgress` events for one stage.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReporter<'a> {
    log: &'a ProgressLog,
    stage: StageKind,
}

impl<'a> ProgressReporter<'a> {
    /// Creates a reporter.
    #[must_use]
    pub fn new(log: &'a ProgressLog, stage: StageKind) -> Self {
        Self { log, stage }
    }

    /// Reports a message.
    pub fn report(&self, message: impl Into<String>) {
        self.log.append(ProgressEvent::StageProgress {
            stage: self.stage,
            message: message.into(),
        });
    }
}

/// Execution context for a single stage.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    view: ReadView<'a>,
    adapters: &'a AdapterSet,
    templates: &'a PromptTemplates,
    config: &'a ArticleConfig,
    progress: ProgressReporter<'a>,
    cancel: &'a CancellationToken,
}

impl<'a> StageContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(
        view: ReadView<'a>,
        adapters: &'a AdapterSet,
        templates: &'a PromptTemplates,
        config: &'a ArticleConfig,
        log: &'a ProgressLog,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            progress: ProgressReporter::new(log, view.stage()),
            view,
            adapters,
            templates,
            config,
            cancel,
        }
    }

    /// The stage being executed.
    #[must_use]
    pub fn stage(&self) -> StageKind {
        self.view.stage()
    }

    /// Read access to the declared state fields.
    #[must_use]
    pub fn view(&self) -> &ReadView<'a> {
        &self.view
    }

    /// The external services.
    #[must_use]
    pub fn adapters(&self) -> &'a AdapterSet {
        self.adapters
    }

    /// The task configuration.
    #[must_use]
    pub fn config(&self) -> &'a ArticleConfig {
        self.config
    }

    /// The live progress reporter.
    #[must_use]
    pub fn progress(&self) -> &ProgressReporter<'a> {
        &self.progress
    }

    /// Returns true if the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Renders a prompt template.
    pub fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
        self.templates.render(template, vars)
    }

    /// Builds a request for the configured model.
    #[must_use]
    pub fn request(&self, prompt: String, label: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, self.config.model.clone()).with_label(label)
    }

    /// Renders a template and generates text, retrying transient failures.
    pub async fn generate(
        &self,
        template: &str,
        vars: &TemplateVars,
        retry: &RetryConfig,
        key: &str,
        json: bool,
    ) -> Result<String, AdapterError> {
        let prompt = self.render(template, vars)?;
        let mut request = self.request(prompt, template);
        if json {
            request = request.expect_json();
        }
        with_retry(retry, key, || self.adapters.generate(&request)).await
    }
}
