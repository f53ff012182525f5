//! Model-generated document annotations.
//!
//! For every registered [`AnnotationField`], the document's plain text is
//! truncated to the input token budget and sent to the generation model
//! with a fixed two-message prompt. The reply is expected to hold a fenced
//! JSON block listing `{Nom, Description}` objects. Anything else,
//! including a failed generation call, degrades to an empty list.
//!
//! The parsed list is rendered as an HTML table in a sidecar file next to
//! the document (`{stem}.{field}.html`), and each described entity is fed
//! into the running [`EntityDescriptions`].

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunk::truncate_tokens;
use crate::entities::EntityDescriptions;
use crate::error::SkipReason;
use crate::llm::{ChatMessage, GenerationProvider};
use crate::models::AnnotatedEntity;

/// A model-generated field attached to every document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationField {
    /// Sidecar suffix and registry key.
    pub name: &'static str,
    /// Column label in result tables.
    pub label: &'static str,
    pub prompt: &'static str,
}

pub const ENTITIES_FIELD: AnnotationField = AnnotationField {
    name: "entities",
    label: "Entités",
    prompt: "Extrait un objet JSON contenant la liste (champ 'entités') des entitées nommées (champ 'Nom') associées à leur description (champ 'Description').  : ",
};

/// Every field generated at reindex time, in column order.
pub const FIELDS: &[AnnotationField] = &[ENTITIES_FIELD];

const ASSISTANT_PROMPT: &str =
    "Tu es un assistant. Réponds correctement aux questions de l'utilisateur.";

/// Key the entity list is expected under.
const LIST_KEY: &str = "entités";

const NAME_KEYS: &[&str] = &["Nom", "nom", "Name", "name"];
const DESCRIPTION_KEYS: &[&str] = &["Description", "description"];

/// `{doc_path without .xml}.{field}.html`
pub fn sidecar_path(doc_path: &Path, field: &AnnotationField) -> PathBuf {
    doc_path.with_extension(format!("{}.html", field.name))
}

/// The two-message prompt for one field.
pub fn build_messages(field: &AnnotationField, text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::assistant(ASSISTANT_PROMPT),
        ChatMessage::user(format!("{}{}", field.prompt, text)),
    ]
}

/// Concatenate the lines between ``` fence markers.
fn fenced_content(reply: &str) -> String {
    let mut out = String::new();
    let mut inside = false;
    for line in reply.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Parse a model reply into entities. Never fails: a reply without a fenced
/// block, with invalid JSON, or without a list yields an empty vector.
///
/// A bare JSON list is taken as the entity list. In an object, the list is
/// read from `entités`, falling back to the first list-valued key in the
/// order the model wrote them.
pub fn parse_entities(reply: &str) -> Vec<AnnotatedEntity> {
    let content = fenced_content(reply);
    if content.trim().is_empty() {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "annotation reply is not valid JSON");
            return Vec::new();
        }
    };

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get(LIST_KEY).and_then(Value::as_array) {
            Some(items) => items,
            None => match map.values().find_map(Value::as_array) {
                Some(items) => items,
                None => return Vec::new(),
            },
        },
        _ => return Vec::new(),
    };

    items.iter().filter_map(parse_item).collect()
}

fn parse_item(item: &Value) -> Option<AnnotatedEntity> {
    let obj = item.as_object()?;
    let name = NAME_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(value_to_text)?;
    if name.trim().is_empty() {
        return None;
    }
    let description = DESCRIPTION_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(|v| v.as_str().map(str::to_string));
    Some(AnnotatedEntity {
        name: name.trim().to_string(),
        description,
    })
}

fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Render entities as the sidecar HTML table.
pub fn render_table(entities: &[AnnotatedEntity]) -> String {
    let mut out = String::from("<table><tr><th>Nom</th><th>Description</th></tr>");
    for entity in entities {
        out.push_str("<tr><td>");
        out.push_str(&quick_xml::escape::escape(entity.name.as_str()));
        out.push_str("</td><td>");
        if let Some(desc) = &entity.description {
            out.push_str(&quick_xml::escape::escape(desc.as_str()));
        }
        out.push_str("</td></tr>");
    }
    out.push_str("</table>");
    out
}

/// What annotating one document with one field produced.
#[derive(Debug, Clone)]
pub struct FieldAnnotation {
    pub field: &'static str,
    pub sidecar: PathBuf,
    pub entities: Vec<AnnotatedEntity>,
    /// Set when generation failed and the annotation degraded to empty.
    pub degraded: Option<SkipReason>,
}

pub struct Annotator {
    generator: Arc<dyn GenerationProvider>,
    input_token_limit: usize,
}

impl Annotator {
    pub fn new(generator: Arc<dyn GenerationProvider>, input_token_limit: usize) -> Self {
        Self {
            generator,
            input_token_limit,
        }
    }

    /// Ask the model for one field. Generation errors degrade to an empty
    /// list, reported through the second tuple element.
    pub async fn generate(
        &self,
        text: &str,
        field: &AnnotationField,
    ) -> (Vec<AnnotatedEntity>, Option<SkipReason>) {
        let input = truncate_tokens(text, self.input_token_limit);
        let messages = build_messages(field, input);
        match self.generator.chat(&messages).await {
            Ok(reply) => (parse_entities(&reply), None),
            Err(e) => {
                warn!(field = field.name, error = %e, "annotation generation failed");
                (Vec::new(), Some(SkipReason::Generation(e.to_string())))
            }
        }
    }

    /// Annotate a document for every registered field, write each sidecar,
    /// and accumulate described entities into `descriptions`.
    ///
    /// A sidecar that cannot be written is returned as a skip for that
    /// field; the other fields still run.
    pub async fn annotate_document(
        &self,
        doc_path: &Path,
        text: &str,
        descriptions: &mut EntityDescriptions,
    ) -> Vec<Result<FieldAnnotation, SkipReason>> {
        let mut results = Vec::with_capacity(FIELDS.len());
        for field in FIELDS {
            let (entities, degraded) = self.generate(text, field).await;
            for entity in &entities {
                if let Some(desc) = &entity.description {
                    descriptions.add(&entity.name, desc);
                }
            }

            let sidecar = sidecar_path(doc_path, field);
            let result = match std::fs::write(&sidecar, render_table(&entities)) {
                Ok(()) => Ok(FieldAnnotation {
                    field: field.name,
                    sidecar,
                    entities,
                    degraded,
                }),
                Err(e) => {
                    warn!(path = %sidecar.display(), error = %e, "failed to write annotation");
                    Err(SkipReason::from(e))
                }
            };
            results.push(result);
        }
        results
    }
}
