//! The smoke-test runner: check the credential, connect, send one prompt,
//! print whatever comes back.

use std::{fmt::Display, io::Write, process::ExitCode, sync::Arc};

use crate::{
    config,
    providers::{
        gemini::{Gemini, GeminiConfig},
        LLMProvider,
    },
    types::CompletionRequest,
    LLMError,
};

pub const RESPONSE_HEADER: &str = "--- Response ---";
pub const RESPONSE_FOOTER: &str = "----------------";
pub const ERROR_HEADER: &str = "--- Error ---";

/// How the process should terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The request was attempted, whether or not it succeeded.
    Completed,
    MissingCredential,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Completed => 0,
            Status::MissingCredential => 1,
        }
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeOutcome {
    Responded(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub model: String,
    pub outcome: SmokeOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct SmokeOptions {
    pub model: Option<String>,
    pub prompt: Option<String>,
    /// Models to try one after another instead of the single smoke request.
    pub probe: Vec<String>,
}

impl SmokeOptions {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(config::DEFAULT_MODEL)
    }

    pub fn prompt(&self) -> &str {
        match &self.prompt {
            Some(prompt) => prompt,
            None if self.probe.is_empty() => config::DEFAULT_PROMPT,
            None => config::PROBE_PROMPT,
        }
    }
}

pub struct SmokeTest {
    provider: Arc<dyn LLMProvider>,
    model: String,
    prompt: String,
}

impl SmokeTest {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    /// Issues exactly one request and renders the outcome to `out`.
    pub async fn run<W: Write>(&self, out: &mut W) -> std::io::Result<SmokeOutcome> {
        writeln!(out, "Sending request to Gemini...")?;
        let outcome = self.attempt(&self.model).await;

        match &outcome {
            SmokeOutcome::Responded(text) => render_response(out, text)?,
            SmokeOutcome::Failed(description) => render_error(out, description)?,
        }

        Ok(outcome)
    }

    /// Tries every model in `models` with the configured prompt. A failure
    /// on one model does not stop the others.
    pub async fn probe<W: Write>(
        &self,
        models: &[String],
        out: &mut W,
    ) -> std::io::Result<Vec<ProbeResult>> {
        let mut results = Vec::with_capacity(models.len());

        for model in models {
            let outcome = self.attempt(model).await;
            match &outcome {
                SmokeOutcome::Responded(text) => writeln!(out, "{model} Success: {text}")?,
                SmokeOutcome::Failed(description) => {
                    writeln!(out, "{model} Failed: {description}")?
                }
            }
            results.push(ProbeResult {
                model: model.clone(),
                outcome,
            });
        }

        Ok(results)
    }

    async fn attempt(&self, model: &str) -> SmokeOutcome {
        let request = CompletionRequest::prompt(model, self.prompt.clone());
        tracing::debug!(provider = self.provider.name(), %model, "issuing smoke request");

        match self.provider.complete(request).await {
            Ok(response) => SmokeOutcome::Responded(response.text().to_string()),
            Err(err) => {
                tracing::warn!(provider = self.provider.name(), %model, error = %err, "smoke request failed");
                SmokeOutcome::Failed(err.to_string())
            }
        }
    }
}

pub fn render_response<W: Write>(out: &mut W, text: &str) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{RESPONSE_HEADER}")?;
    writeln!(out, "{text}")?;
    writeln!(out, "{RESPONSE_FOOTER}")
}

pub fn render_error<W: Write>(out: &mut W, description: impl Display) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{ERROR_HEADER}")?;
    writeln!(out, "{description}")
}

/// Full run against Gemini using the process environment.
pub async fn run_from_env<W: Write>(options: &SmokeOptions, out: &mut W) -> std::io::Result<Status> {
    run_with(config::api_key_from_env(), options, out, |api_key| {
        let gemini = Gemini::from_config(GeminiConfig::new(api_key).with_env_overrides())?;
        Ok(Arc::new(gemini) as Arc<dyn LLMProvider>)
    })
    .await
}

/// Runs the smoke test with an already resolved credential. `connect` is
/// only invoked once the credential has been found.
pub async fn run_with<W, F>(
    api_key: Result<String, LLMError>,
    options: &SmokeOptions,
    out: &mut W,
    connect: F,
) -> std::io::Result<Status>
where
    W: Write,
    F: FnOnce(String) -> Result<Arc<dyn LLMProvider>, LLMError>,
{
    let api_key = match api_key {
        Ok(api_key) => api_key,
        Err(err) => {
            tracing::warn!(error = %err, "credential lookup failed");
            writeln!(out, "Error: {} not found in environment.", config::API_KEY_ENV)?;
            return Ok(Status::MissingCredential);
        }
    };

    writeln!(out, "Testing Gemini. Key present: {}", !api_key.is_empty())?;

    let provider = match connect(api_key) {
        Ok(provider) => provider,
        Err(err) => {
            tracing::warn!(error = %err, "failed to construct client");
            render_error(out, &err)?;
            return Ok(Status::Completed);
        }
    };

    let smoke = SmokeTest::new(provider, options.model(), options.prompt());
    if options.probe.is_empty() {
        smoke.run(out).await?;
    } else {
        smoke.probe(&options.probe, out).await?;
    }

    Ok(Status::Completed)
}
