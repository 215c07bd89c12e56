//! Answer synthesis: retrieved passages and the question go into one prompt, a remote
//! generative model answers it.
//!
//! All passages are stuffed into the prompt verbatim, in retrieval order. Large `k` or
//! large passages can exceed the model's input limit; `max_context_chars` caps the
//! context when that matters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chunks::Passage;
use crate::remote::{with_timeout, ServiceError, ServiceFailure};

/// Sampling temperature used unless configured otherwise.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Contexts longer than this are logged, since they approach typical model limits.
const LARGE_CONTEXT_CHARS: usize = 100_000;

const CONTEXT_PLACEHOLDER: &str = "{context}";
const QUESTION_PLACEHOLDER: &str = "{question}";

/// Instruction used when no template is configured.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are given context taken from a reference index. The context lists terms together with \
their identifiers or codes. Using only this context, find the single most relevant \
identifier or answer for the question below.

Context:
{context}

Question:
{question}

Answer with the identifier or answer that best matches the question. If there is no exact \
match, give the closest plausible one from the context. Do not invent anything that is not \
in the context.

Answer:
";

/// A remote service that completes prompts with the named model.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<String, ServiceError>;
}

/// Prompt text with `{context}` and `{question}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Result<Self, TemplateError> {
        let text = text.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
            if !text.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder(placeholder));
            }
        }
        Ok(Self(text))
    }

    /// Fill in both placeholders. Placeholder-like text inside the context or question
    /// is left alone.
    pub fn render(&self, context: &str, question: &str) -> String {
        let parts: Vec<String> = self
            .0
            .split(CONTEXT_PLACEHOLDER)
            .map(|part| part.replace(QUESTION_PLACEHOLDER, question))
            .collect();
        parts.join(context)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self(DEFAULT_PROMPT_TEMPLATE.to_string())
    }
}

/// The model's answer to one question. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
}

/// Builds the prompt and asks the generative model. Cheap to clone.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    service: Arc<dyn GenerativeService>,
    model: String,
    template: PromptTemplate,
    temperature: f32,
    timeout: Option<Duration>,
    max_context_chars: Option<usize>,
}

impl AnswerSynthesizer {
    pub fn new(service: Arc<dyn GenerativeService>, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
            template: PromptTemplate::default(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: None,
            max_context_chars: None,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap the context; passages that no longer fit are dropped from the end.
    pub fn with_max_context_chars(mut self, max: Option<usize>) -> Self {
        self.max_context_chars = max;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The exact prompt sent for these passages and question.
    pub fn prompt(&self, passages: &[Passage], question: &str) -> String {
        let context = build_context(passages, self.max_context_chars);
        let context_chars = context.chars().count();
        if context_chars > LARGE_CONTEXT_CHARS {
            warn!(
                context_chars,
                passages = passages.len(),
                "prompt context is very large and may exceed the model input limit"
            );
        }
        self.template.render(&context, question)
    }

    /// Ask the model. Generation calls are never retried.
    pub async fn synthesize(
        &self,
        passages: &[Passage],
        question: &str,
    ) -> Result<Answer, SynthesisError> {
        let prompt = self.prompt(passages, question);
        debug!(model = %self.model, prompt_chars = prompt.len(), "generating answer");
        let output = with_timeout(
            self.timeout,
            self.service.generate(&prompt, &self.model, self.temperature),
        )
        .await
        .map_err(|source| SynthesisError::Service {
            model: self.model.clone(),
            source,
        })?;
        let text = output.trim();
        if text.is_empty() {
            return Err(SynthesisError::NoAnswer {
                model: self.model.clone(),
            });
        }
        Ok(Answer {
            text: text.to_string(),
        })
    }
}

/// Passage contents in order, separated by blank lines.
fn build_context(passages: &[Passage], max_chars: Option<usize>) -> String {
    let mut context = String::new();
    let mut used = 0;
    for passage in passages {
        let sep = if context.is_empty() { 0 } else { 2 };
        let len = passage.content.chars().count();
        if let Some(max) = max_chars {
            if used + sep + len > max {
                if context.is_empty() {
                    context.extend(passage.content.chars().take(max));
                }
                break;
            }
        }
        if sep > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&passage.content);
        used += sep + len;
    }
    context
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("prompt template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("generation with {model} failed: {source}")]
    Service { model: String, source: ServiceError },
    #[error("{model} produced no answer")]
    NoAnswer { model: String },
}

impl SynthesisError {
    pub fn kind(&self) -> ServiceFailure {
        match self {
            SynthesisError::Service { source, .. } => source.kind,
            SynthesisError::NoAnswer { .. } => ServiceFailure::BadResponse,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SynthesisError::Service { source, .. } if source.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records prompts and answers with a fixed reply.
    struct Recorder {
        reply: Result<String, ServiceError>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn replying(reply: Result<String, ServiceError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerativeService for Recorder {
        async fn generate(
            &self,
            prompt: &str,
            _model: &str,
            _temperature: f32,
        ) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn passages(texts: &[&str]) -> Vec<Passage> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Passage {
                content: t.to_string(),
                sequence_index: i,
                source_id: None,
            })
            .collect()
    }

    #[test]
    fn template_needs_both_placeholders() {
        assert!(PromptTemplate::new("{context} {question}").is_ok());
        assert!(matches!(
            PromptTemplate::new("just {question}"),
            Err(TemplateError::MissingPlaceholder("{context}"))
        ));
        assert!(PromptTemplate::new("just {context}").is_err());
        assert!(PromptTemplate::new(DEFAULT_PROMPT_TEMPLATE).is_ok());
    }

    #[test]
    fn render_does_not_touch_placeholders_in_context() {
        let t = PromptTemplate::new("C: {context} | Q: {question}").unwrap();
        assert_eq!(t.render("see {question}", "why?"), "C: see {question} | Q: why?");
    }

    #[test]
    fn context_keeps_retrieval_order() {
        assert_eq!(build_context(&passages(&["b", "a", "c"]), None), "b\n\na\n\nc");
    }

    #[test]
    fn context_cap_drops_trailing_passages() {
        let p = passages(&["aaaa", "bbbb", "cccc"]);
        assert_eq!(build_context(&p, Some(10)), "aaaa\n\nbbbb");
        assert_eq!(build_context(&p, Some(3)), "aaa");
    }

    #[tokio::test]
    async fn prompt_contains_context_and_question() {
        let service = Recorder::replying(Ok("  K35.80 \n".to_string()));
        let synth = AnswerSynthesizer::new(service.clone(), "gen");
        let answer = synth
            .synthesize(&passages(&["Appendicitis, acute K35.80"]), "acute appendicitis")
            .await
            .unwrap();
        assert_eq!(answer.text, "K35.80");
        let prompt = service.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Appendicitis, acute K35.80"));
        assert!(prompt.contains("acute appendicitis"));
    }

    #[tokio::test]
    async fn custom_template_is_used() {
        let service = Recorder::replying(Ok("yes".to_string()));
        let template = PromptTemplate::new("Q={question};C={context}").unwrap();
        let synth = AnswerSynthesizer::new(service.clone(), "gen").with_template(template);
        synth.synthesize(&passages(&["x", "y"]), "q").await.unwrap();
        assert_eq!(service.prompts.lock().unwrap()[0], "Q=q;C=x\n\ny");
    }

    #[tokio::test]
    async fn blank_output_is_no_answer() {
        let service = Recorder::replying(Ok("   ".to_string()));
        let synth = AnswerSynthesizer::new(service, "gen");
        let err = synth.synthesize(&passages(&["x"]), "q").await.unwrap_err();
        assert!(matches!(err, SynthesisError::NoAnswer { .. }));
    }

    #[tokio::test]
    async fn service_failures_are_not_retried() {
        let service = Recorder::replying(Err(ServiceError::new(ServiceFailure::Network, "down")));
        let synth = AnswerSynthesizer::new(service.clone(), "gen");
        let err = synth.synthesize(&passages(&["x"]), "q").await.unwrap_err();
        assert_eq!(err.kind(), ServiceFailure::Network);
        assert!(!err.is_timeout());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
