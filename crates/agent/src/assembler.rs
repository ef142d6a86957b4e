use serde::Serialize;
use tera::{Context, Tera};

use betweenus_core::domain::response::{Section, StructuredResponse};
use betweenus_core::errors::MediationError;

const TEMPLATE_NAME: &str = "intervention.txt";
const TEMPLATE: &str = "{% for section in sections %}*{{ section.label }}*\n{{ section.body }}{% if not loop.last %}\n\n{% endif %}{% endfor %}";

/// Final text handed back to the connector, plus the labeled sections for richer rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormattedText {
    pub text: String,
    pub sections: Vec<RenderedSection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedSection {
    pub key: String,
    pub label: String,
    pub body: String,
}

pub struct OutputAssembler {
    templates: Tera,
}

impl OutputAssembler {
    pub fn new() -> Result<Self, tera::Error> {
        let mut templates = Tera::default();
        templates.autoescape_on(vec![]);
        templates.add_raw_template(TEMPLATE_NAME, TEMPLATE)?;
        Ok(Self { templates })
    }

    pub fn assemble(&self, response: &StructuredResponse) -> Result<FormattedText, MediationError> {
        let mut sections = Vec::with_capacity(Section::ORDER.len());
        for section in Section::ORDER {
            let body = response.section(section).trim();
            if body.is_empty() {
                return Err(MediationError::synthesis_incomplete(response.strategy(), section.key()));
            }
            sections.push(RenderedSection {
                key: section.key().to_owned(),
                label: section.label().to_owned(),
                body: body.to_owned(),
            });
        }

        let mut context = Context::new();
        context.insert("sections", &sections);
        let text = self.templates.render(TEMPLATE_NAME, &context).map_err(|error| {
            tracing::error!(
                event_name = "assembler.render_failed",
                error = %error,
                "failed to render intervention"
            );
            MediationError::synthesis_incomplete(response.strategy(), "template")
        })?;

        Ok(FormattedText { text, sections })
    }
}

#[cfg(test)]
mod tests {
    use betweenus_core::domain::response::{Section, SectionDraft, StructuredResponse};

    use super::OutputAssembler;

    fn response() -> StructuredResponse {
        let mut draft = SectionDraft::default();
        draft
            .push(Section::Summary, "Two dates are in play.")
            .push(Section::CommonGround, "Everyone wants the launch to land.")
            .push(Section::Reframing, "Check which date was last agreed.")
            .push(Section::CommunicationAlternatives, "Instead of saying \"no\", try: \"let's check\".");
        StructuredResponse::from_draft(draft, "analytical").expect("complete")
    }

    #[test]
    fn sections_render_in_fixed_order_with_labels() {
        let formatted = OutputAssembler::new().expect("template").assemble(&response()).expect("text");

        assert_eq!(
            formatted.text,
            "*Summary*\nTwo dates are in play.\n\n\
             *Common Ground*\nEveryone wants the launch to land.\n\n\
             *Reframing*\nCheck which date was last agreed.\n\n\
             *Communication Alternatives*\nInstead of saying \"no\", try: \"let's check\"."
        );
        let keys = formatted.sections.iter().map(|section| section.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, ["summary", "common_ground", "reframing", "communication_alternatives"]);
    }

    #[test]
    fn quotes_are_not_html_escaped() {
        let formatted = OutputAssembler::new().expect("template").assemble(&response()).expect("text");
        assert!(!formatted.text.contains("&quot;"));
    }
}
