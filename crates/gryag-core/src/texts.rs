//! Localized user-facing texts. The bot speaks Ukrainian.
//!
//! Everything a user can ever see on an error path lives here; raw error
//! strings and internal identifiers never leave the process.

use rand::seq::SliceRandom;

/// Persona used when no system prompt row is active at any scope.
pub const DEFAULT_PERSONA: &str = "Ти — гряг, уїдливий, але доброзичливий \
співрозмовник у груповому чаті. Відповідай коротко, по суті, мовою чату. \
Пам'ятай, що ти бачиш лише фрагмент розмови, і не вигадуй фактів про людей.";

/// Short fallback when the model is unavailable (circuit open, timeout).
pub const LLM_UNAVAILABLE: &str = "Мене трохи заглючило. Спробуй ще раз за хвилину.";

/// Ban notice, sent at most once per cooldown.
pub const BANNED: &str = "Тебе тут забанили. Мовчу.";

/// Tool dispatcher: unknown tool name requested by the model.
pub const UNKNOWN_TOOL: &str = "такого інструмента не існує";

/// Tool dispatcher: feature quota exhausted.
pub const TOOL_THROTTLED: &str = "забагато запитів на цю функцію, зачекай годинку";

/// Tool dispatcher: handler blew up.
pub const TOOL_FAILED: &str = "інструмент зламався, спробуй інакше";

/// Quota snark variants for users who hit the hourly ceiling.
const QUOTA_SNARK: &[&str] = &[
    "Та годі вже, дай перепочити. Почекай годинку.",
    "Ти сьогодні занадто активний. Ліміт.",
    "Стоп-кран. На цю годину з тебе досить.",
];

/// Pick a random quota reply.
pub fn quota_snark() -> &'static str {
    QUOTA_SNARK
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(QUOTA_SNARK[0])
}
