//! ChatML prompts grounded in the recognized artwork

use crate::core::ArtworkMetadata;

/// System turn carrying the artwork description. Empty fields are left out.
pub fn system_prompt(artwork: Option<&ArtworkMetadata>) -> String {
	let mut prompt = String::from("<|im_start|>system\n[ARTWORK INFO]\n\n");

	if let Some(art) = artwork {
		let fields = [
			("Title", &art.title),
			("Object Date", &art.date),
			("Artist Display Name", &art.author),
			("Medium", &art.technique),
			("Type", &art.kind),
			("School", &art.school),
			("Description", &art.description),
		];
		for (label, value) in fields {
			if !value.is_empty() {
				prompt.push_str(label);
				prompt.push_str(": ");
				prompt.push_str(value);
				prompt.push('\n');
			}
		}
	}

	prompt.push_str("\n<|im_end|>\n");
	prompt
}

/// User turn followed by the opening of the assistant turn.
pub fn user_prompt(question: &str) -> String {
	format!(
		"<|im_start|>user\n[QUESTION]\n\n{}\n<|im_end|>\n<|im_start|>assistant",
		question.trim()
	)
}
