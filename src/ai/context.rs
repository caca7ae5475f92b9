//! Prompt context assembly: business profile, prior turns, knowledge.

use crate::models::{conversation_message, knowledge_entry};
use crate::repositories::ai::BusinessProfile;

/// Used when a tenant has not written its own system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Kamu adalah asisten toko online yang ramah dan membantu.
Jawab pertanyaan customer dengan sopan, jelas, dan ringkas.
Jika tidak tahu jawabannya, katakan dengan jujur dan sarankan untuk menghubungi admin.
Selalu gunakan bahasa yang santun dan profesional.";

/// Reply rules appended to every system prompt.
pub const REPLY_RULES: &str = "IMPORTANT RULES:
- Respond in Indonesian language
- Be helpful, friendly, and professional
- Keep responses concise (max 300 characters)
- If you don't know something, say so honestly
- Use the context provided to answer accurately
- Do not make up information";

pub fn business_block(profile: &BusinessProfile) -> String {
    let fields = [
        ("Nama Bisnis", &profile.name),
        ("Jenis Bisnis", &profile.kind),
        ("Deskripsi", &profile.description),
        ("Alamat", &profile.address),
        ("Jam Operasional", &profile.hours),
        ("Metode Pembayaran", &profile.payment_methods),
    ];
    fields
        .iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{}: {}", label, v))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prior turns, oldest first, each cut to `char_budget` characters.
pub fn history_block(turns: &[conversation_message::Model], char_budget: usize) -> String {
    if turns.is_empty() {
        return String::new();
    }
    let mut block = String::from("RIWAYAT PERCAKAPAN SEBELUMNYA:\n");
    for turn in turns {
        let role = if turn.is_from_me { "Anda" } else { "Customer" };
        block.push_str(role);
        block.push_str(": ");
        block.push_str(&truncate(&turn.message_text, char_budget));
        block.push('\n');
    }
    block
}

pub fn knowledge_block(entries: &[knowledge_entry::Model]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut block = String::from("RELEVANT INFORMATION:\n");
    for entry in entries {
        block.push_str(&format!("- {}: {}\n", entry.title, entry.content));
    }
    block
}

/// Join the non-empty sections with blank lines.
pub fn assemble(sections: &[String]) -> String {
    sections
        .iter()
        .map(|s| s.trim_end())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(text: &str, budget: usize) -> String {
    if text.chars().count() > budget {
        let cut: String = text.chars().take(budget).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
