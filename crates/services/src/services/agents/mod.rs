//! Agent contract
//!
//! Every agent runs the same pipeline: validate the input, prompt the
//! model, parse the reply into a typed output, check business rules and
//! describe artifacts. Nothing is persisted here; the orchestrator writes
//! results only after every step succeeded.

pub mod brief;
pub mod code;
pub mod content;
pub mod design;
pub mod discovery;
pub mod error;
pub mod extraction;
pub mod industry;
pub mod planner;
pub mod quality;
pub mod registry;

use async_trait::async_trait;
use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

pub use brief::{AgentInput, CompanyBrief, RefinementFeedback};
pub use error::{AgentError, ErrorKind};
pub use registry::AgentRegistry;

use self::industry::Industry;
use crate::services::llm::{CompletionRequest, LlmProvider, ProviderContent, role_marker};

/// Identifiers of the execution an agent runs for.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub workflow_execution_id: Option<Uuid>,
    pub agent_execution_id: Uuid,
    pub iteration: i64,
}

/// A file an agent wants stored once its output is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDescriptor {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct AgentRunOutput {
    pub output: Value,
    pub evaluation: Option<Value>,
    pub artifacts: Vec<ArtifactDescriptor>,
}

const STRICT_SUFFIX: &str = "\n\nIMPORTANT: your previous reply could not be parsed. Reply with ONLY one ```json fenced block containing a single JSON object that matches the schema exactly. No prose before or after it.";

pub fn schema_json<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default()
}

#[async_trait]
pub trait Agent: Send + Sync + 'static {
    type Input: AgentInput + DeserializeOwned + JsonSchema + Send + Sync;
    type Output: DeserializeOwned + Serialize + JsonSchema + Send + Sync;

    const ROLE: AgentRole;
    const NAME: &'static str;

    /// Responsibilities, placed in the system prompt.
    fn instructions(&self) -> &'static str;

    /// Agent specific part of the user prompt.
    fn task(&self, input: &Self::Input) -> String;

    fn check_preconditions(&self, _input: &Self::Input) -> Result<(), AgentError> {
        Ok(())
    }

    /// Business rules on a well-formed output.
    fn validate_output(&self, _output: &Self::Output) -> Result<(), AgentError> {
        Ok(())
    }

    fn store_artifacts(&self, _output: &Self::Output, _ctx: &AgentContext) -> Vec<ArtifactDescriptor> {
        Vec::new()
    }

    /// Scores for the quality loop. Only QUALITY agents return one.
    fn evaluation(&self, _output: &Self::Output) -> Option<Value> {
        None
    }

    fn max_tokens(&self) -> Option<u32> {
        None
    }

    fn validate_input(&self, raw: &Value) -> Result<Self::Input, AgentError> {
        let input: Self::Input = serde_json::from_value(raw.clone())
            .map_err(|e| AgentError::Validation(e.to_string()))?;
        self.check_preconditions(&input)?;
        Ok(input)
    }

    fn system_prompt(&self, input: &Self::Input, strict: bool) -> String {
        let industry = Industry::from_label(&input.profile().industry);
        let schema = serde_json::to_string_pretty(&schema_json::<Self::Output>()).unwrap_or_default();
        let mut prompt = format!(
            "{}You are the {} on a team that builds small-business websites.\n\n{}\n\nIndustry guidance: {}\n\nReply with a single ```json fenced block whose object matches this JSON schema:\n{}",
            role_marker(&Self::ROLE.to_string()),
            Self::NAME,
            self.instructions(),
            industry.guidance(),
            schema
        );
        if strict {
            prompt.push_str(STRICT_SUFFIX);
        }
        prompt
    }

    fn user_prompt(&self, input: &Self::Input, ctx: &AgentContext) -> String {
        let mut prompt = format!(
            "Project {} (iteration {}).\n\n{}\n\n{}",
            ctx.project_id,
            ctx.iteration,
            input.profile().summary(),
            self.task(input)
        );
        if let Some(feedback) = input.feedback() {
            prompt.push_str("\n\n");
            prompt.push_str(&feedback.prompt_section());
        }
        prompt
    }

    async fn execute(
        &self,
        input: &Self::Input,
        ctx: &AgentContext,
        provider: &dyn LlmProvider,
        strict: bool,
    ) -> Result<ProviderContent, AgentError> {
        let mut request =
            CompletionRequest::new(self.system_prompt(input, strict), self.user_prompt(input, ctx));
        request.max_tokens = self.max_tokens();
        if strict {
            request.temperature = Some(0.0);
        }
        Ok(provider.complete(request).await?)
    }

    fn parse_output(&self, content: &ProviderContent) -> Result<Self::Output, AgentError> {
        let value = extraction::extract_json(&content.joined_text()).map_err(AgentError::Parse)?;
        serde_json::from_value(value).map_err(|e| AgentError::Parse(e.to_string()))
    }
}

/// Object-safe view of an [`Agent`], used by the orchestrator.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    fn role(&self) -> AgentRole;

    fn name(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    fn output_schema(&self) -> Value;

    fn check_input(&self, raw_input: &Value) -> Result<(), AgentError>;

    async fn run(
        &self,
        raw_input: &Value,
        ctx: &AgentContext,
        provider: &dyn LlmProvider,
        strict: bool,
    ) -> Result<AgentRunOutput, AgentError>;
}

#[async_trait]
impl<A: Agent> AgentRunner for A {
    fn role(&self) -> AgentRole {
        A::ROLE
    }

    fn name(&self) -> &'static str {
        A::NAME
    }

    fn input_schema(&self) -> Value {
        schema_json::<A::Input>()
    }

    fn output_schema(&self) -> Value {
        schema_json::<A::Output>()
    }

    fn check_input(&self, raw_input: &Value) -> Result<(), AgentError> {
        self.validate_input(raw_input).map(|_| ())
    }

    async fn run(
        &self,
        raw_input: &Value,
        ctx: &AgentContext,
        provider: &dyn LlmProvider,
        strict: bool,
    ) -> Result<AgentRunOutput, AgentError> {
        let input = self.validate_input(raw_input)?;
        let content = self.execute(&input, ctx, provider, strict).await?;
        let output = self.parse_output(&content)?;
        self.validate_output(&output)?;

        let evaluation = self.evaluation(&output);
        let artifacts = self.store_artifacts(&output, ctx);
        let output = serde_json::to_value(&output).map_err(|e| AgentError::Parse(e.to_string()))?;

        Ok(AgentRunOutput {
            output,
            evaluation,
            artifacts,
        })
    }
}
