//! Prompt assembly. Pure: no I/O, deterministic field order.

use crate::document::Document;
use crate::llm::ProviderPayload;
use crate::template::FieldSpec;

const SYSTEM_PROMPT: &str = "Tu es un assistant qui extrait des champs factuels depuis un document \
immobilier. Réponds UNIQUEMENT avec un objet JSON, sans texte avant ou après.";

/// What the model reads: paginated text, or the file itself.
#[derive(Debug, Clone, Copy)]
pub enum PromptInput<'a> {
    Text(&'a str),
    Document(&'a Document),
}

/// `- <path> | <label> | <type>` lines, in the given order.
pub fn field_lines<'a>(fields: impl IntoIterator<Item = &'a FieldSpec>) -> String {
    fields
        .into_iter()
        .map(|f| format!("- {} | {} | {}", f.path, f.label, f.expected_type))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the provider payload asking for `fields` out of `input`.
pub fn build_request<'a>(
    fields: impl IntoIterator<Item = &'a FieldSpec>,
    input: PromptInput<'_>,
    doc_type: &str,
) -> ProviderPayload {
    let fields = field_lines(fields);

    let mut user = vec![
        format!("Type de document : {doc_type}."),
        "Produit un objet JSON avec exactement les clés dot-path listées ci-dessous.".to_string(),
        "Pour chaque clé, renvoie {\"value\": <valeur ou \"not found\">, \"page\": <numero de page \
         ou null>, \"excerpt\": <phrase source ou \"\">}."
            .to_string(),
        "Si tu ne trouves pas, value = \"not found\", page = null, excerpt = \"\".".to_string(),
        "Si c'est une liste : renvoie un tableau JSON.".to_string(),
        "Si c'est un boolean : true/false.".to_string(),
        "Si c'est un objet contact : {\"email\": \"...\", \"telephone\": \"...\"}.".to_string(),
    ];

    match input {
        PromptInput::Text(text) => {
            user.push(format!(
                "Champs à extraire :\n{fields}\n\nDocument paginé :\n{text}"
            ));
            ProviderPayload::text(SYSTEM_PROMPT, user.join("\n"))
        }
        PromptInput::Document(document) => {
            user.push(format!(
                "Champs à extraire :\n{fields}\n\nLe document est joint ({}). Numérote les pages \
                 à partir de 1.",
                document.file_name
            ));
            ProviderPayload::text(SYSTEM_PROMPT, user.join("\n"))
                .with_attachment(document.attachment())
        }
    }
}
