//! Content request broker.
//!
//! Turns engine requests into generator calls, validates the responses and
//! substitutes deterministic fallback content on any failure. Callers always
//! get schema-valid content back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::fallback;
use super::generator::{ContentGenerator, OpenAiGenerator, OpenAiGeneratorConfig};
use super::prompt::build_prompt;
use super::types::{
    ContentOrigin, ContentRequest, IfThenPlan, Intervention, StepContent, StructuredContent,
    Validated,
};
use super::validate::validate_response;
use crate::config::{EcosConfig, FlowConfig};
use crate::store::StuckType;

pub struct ContentBroker {
    generator: Option<Arc<dyn ContentGenerator>>,
    timeout: Duration,
    max_retries: u32,
    flow: FlowConfig,
}

impl ContentBroker {
    pub fn new(
        generator: Option<Arc<dyn ContentGenerator>>,
        timeout: Duration,
        max_retries: u32,
        flow: FlowConfig,
    ) -> Self {
        Self {
            generator,
            timeout,
            max_retries,
            flow,
        }
    }

    /// Broker that never calls out and always serves fallback content.
    pub fn fallback_only(flow: FlowConfig) -> Self {
        Self::new(None, Duration::ZERO, 0, flow)
    }

    /// Build from configuration, wiring an OpenAI-compatible generator when
    /// it is enabled and an API key is available.
    pub fn from_config(config: &EcosConfig) -> Self {
        let generator = match OpenAiGeneratorConfig::from_settings(&config.generator) {
            Some(settings) => {
                info!(
                    model = %settings.model,
                    base_url = %settings.base_url,
                    "content generator enabled"
                );
                Some(Arc::new(OpenAiGenerator::new(settings)) as Arc<dyn ContentGenerator>)
            }
            None => {
                if config.generator.enabled {
                    warn!(
                        env = %config.generator.api_key_env,
                        "API key not set, content will use fallback"
                    );
                }
                None
            }
        };
        Self::new(
            generator,
            Duration::from_secs(config.generator.timeout_secs),
            config.generator.max_retries,
            config.flow.clone(),
        )
    }

    pub fn flow(&self) -> &FlowConfig {
        &self.flow
    }

    /// Resolve a request to schema-valid content.
    pub async fn request(&self, request: &ContentRequest) -> StructuredContent {
        self.request_traced(request).await.0
    }

    /// Like [`request`](Self::request), also reporting where the content came from.
    pub async fn request_traced(
        &self,
        request: &ContentRequest,
    ) -> (StructuredContent, ContentOrigin) {
        let kind = request.kind.as_str();
        let Some(generator) = &self.generator else {
            debug!(kind, "no generator configured, using fallback");
            return (self.fallback(request), ContentOrigin::Fallback);
        };

        for attempt in 0..=self.max_retries {
            let prompt = build_prompt(request, attempt > 0);
            let outcome = tokio::time::timeout(self.timeout, generator.generate(&prompt)).await;
            let raw = match outcome {
                Err(_) => {
                    warn!(
                        kind,
                        attempt,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "content generation timed out"
                    );
                    break;
                }
                Ok(Err(e)) => {
                    warn!(
                        kind,
                        attempt,
                        provider = generator.name(),
                        code = e.code(),
                        "content generation failed: {e}"
                    );
                    break;
                }
                Ok(Ok(raw)) => raw,
            };

            match validate_response(request, &raw) {
                Validated::Valid(content) => {
                    debug!(kind, attempt, "generated content accepted");
                    return (self.complete(request, content), ContentOrigin::Generated);
                }
                Validated::Invalid { reason } => {
                    warn!(kind, attempt, %reason, "generated content rejected");
                }
            }
        }

        info!(kind, "serving fallback content");
        (self.fallback(request), ContentOrigin::Fallback)
    }

    pub async fn micro_step(&self, request: &ContentRequest) -> StepContent {
        match self.request(request).await {
            StructuredContent::Step(step) => step,
            _ => fallback::micro_step(&request.mainline_title, &self.flow),
        }
    }

    pub async fn upgrade_step(&self, request: &ContentRequest) -> StepContent {
        match self.request(request).await {
            StructuredContent::Step(step) => step,
            _ => fallback::upgrade_step(&request.mainline_title, &self.flow),
        }
    }

    pub async fn if_then_plan(&self, request: &ContentRequest) -> IfThenPlan {
        match self.request(request).await {
            StructuredContent::Plan(plan) => plan,
            _ => fallback::if_then_plan(),
        }
    }

    pub async fn intervention(&self, request: &ContentRequest) -> Intervention {
        match self.request(request).await {
            StructuredContent::Intervention(iv) => iv,
            _ => fallback::intervention(request, &self.flow),
        }
    }

    fn fallback(&self, request: &ContentRequest) -> StructuredContent {
        fallback::fallback_content(request, &self.flow)
    }

    /// Fill fields a valid response may legitimately omit.
    fn complete(&self, request: &ContentRequest, content: StructuredContent) -> StructuredContent {
        match content {
            StructuredContent::Intervention(mut iv) => {
                if iv.emotion_label.is_none() {
                    iv.emotion_label = request.emotion_label.clone();
                }
                if iv.stuck_type == StuckType::SelfLimiting && iv.evidence_quotes.is_none() {
                    iv.evidence_quotes =
                        fallback::evidence_quotes(iv.stuck_type, &request.evidence, &self.flow);
                }
                StructuredContent::Intervention(iv)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::generator::GeneratorError;
    use crate::test_utils::ScriptedGenerator;

    fn broker(generator: Arc<ScriptedGenerator>) -> ContentBroker {
        ContentBroker::new(
            Some(generator),
            Duration::from_secs(5),
            1,
            FlowConfig::default(),
        )
    }

    const VALID_MICRO: &str = r#"{"micro_step":{"duration_min":2,"instruction":"翻开书","acceptance_criteria":"书翻开了"}}"#;

    #[tokio::test]
    async fn no_generator_serves_fallback() {
        let broker = ContentBroker::fallback_only(FlowConfig::default());
        let (content, origin) = broker
            .request_traced(&ContentRequest::micro_step("读书"))
            .await;
        assert_eq!(origin, ContentOrigin::Fallback);
        let StructuredContent::Step(step) = content else {
            panic!("expected step");
        };
        assert!(step.instruction.contains("读书"));
    }

    #[tokio::test]
    async fn valid_first_response_is_used() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(VALID_MICRO.to_owned())]));
        let broker = broker(Arc::clone(&generator));
        let (content, origin) = broker
            .request_traced(&ContentRequest::micro_step("读书"))
            .await;
        assert_eq!(origin, ContentOrigin::Generated);
        assert!(matches!(content, StructuredContent::Step(ref s) if s.instruction == "翻开书"));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_then_valid_uses_retry() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("not json at all".to_owned()),
            Ok(VALID_MICRO.to_owned()),
        ]));
        let broker = broker(Arc::clone(&generator));
        let (_, origin) = broker
            .request_traced(&ContentRequest::micro_step("读书"))
            .await;
        assert_eq!(origin, ContentOrigin::Generated);
        assert_eq!(generator.calls(), 2);
        let prompts = generator.prompts();
        assert!(!prompts[0].system.contains("上一次"));
        assert!(prompts[1].system.contains("上一次"));
    }

    #[tokio::test]
    async fn two_invalid_responses_fall_back() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok(r#"{"step":{"instruction":"x"}}"#.to_owned()),
            Ok(r#"{"step":{"instruction":"x"}}"#.to_owned()),
            Ok(VALID_MICRO.to_owned()),
        ]));
        let broker = broker(Arc::clone(&generator));
        let (_, origin) = broker
            .request_traced(&ContentRequest::upgrade_step("读书", "翻开书"))
            .await;
        assert_eq!(origin, ContentOrigin::Fallback);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn transport_error_falls_back_without_retry() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(GeneratorError::RequestError("connection refused".into())),
            Ok(VALID_MICRO.to_owned()),
        ]));
        let broker = broker(Arc::clone(&generator));
        let step = broker.micro_step(&ContentRequest::micro_step("读书")).await;
        assert_eq!(step, fallback::micro_step("读书", &FlowConfig::default()));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn slow_generator_times_out_to_fallback() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![Ok(VALID_MICRO.to_owned())])
                .with_delay(Duration::from_millis(200)),
        );
        let broker = ContentBroker::new(
            Some(generator),
            Duration::from_millis(20),
            1,
            FlowConfig::default(),
        );
        let (_, origin) = broker
            .request_traced(&ContentRequest::micro_step("读书"))
            .await;
        assert_eq!(origin, ContentOrigin::Fallback);
    }

    #[tokio::test]
    async fn self_limiting_quotes_filled_from_evidence() {
        let raw = r#"{"body_reset":"按压桌面","intervention_text":"试2分钟","restart_step":{"duration_min":2,"instruction":"写一句话","acceptance_criteria":"写了"},"push_line":"走"}"#;
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(raw.to_owned())]));
        let broker = broker(generator);
        let evidence: Vec<String> = (0..5).map(|i| format!("完成了：第{i}件")).collect();
        let req = ContentRequest::intervention(StuckType::SelfLimiting, "写论文")
            .with_emotion(Some("沮丧"))
            .with_evidence(evidence);
        let iv = broker.intervention(&req).await;
        assert_eq!(iv.body_reset, "按压桌面");
        assert_eq!(iv.emotion_label.as_deref(), Some("沮丧"));
        assert_eq!(
            iv.evidence_quotes.expect("quotes"),
            vec!["完成了：第0件", "完成了：第1件", "完成了：第2件"]
        );
    }

    #[tokio::test]
    async fn intervention_fallback_is_keyed_by_stuck_type() {
        let broker = ContentBroker::fallback_only(FlowConfig::default());
        let req = ContentRequest::intervention(StuckType::RewardMismatch, "写论文");
        let iv = broker.intervention(&req).await;
        assert_eq!(iv.stuck_type, StuckType::RewardMismatch);
        assert!(iv.body_reset.contains("手机"));
        assert!(iv.evidence_quotes.is_none());
    }
}
