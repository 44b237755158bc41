use crate::config::{CategoriesConfig, VarietyConfig};

use super::details::ScoreLog;

/// Variety multiplier for a category given the recent played history
/// (oldest first). Three independent effects:
///
/// - positional penalty when the category was played recently, interpolating
///   from `penalty_first` (newest slot) to `penalty_last` over `penalty_num`
///   slots and clamping to `penalty_last` beyond them;
/// - group penalty when the category shares a variety group with the most
///   recent entry;
/// - novelty boost when the category is absent from the history entirely.
pub fn variety_multiplier(
    config: &VarietyConfig,
    categories: &CategoriesConfig,
    category: &str,
    history: &[String],
    log: &mut ScoreLog,
) -> f64 {
    let mut multiplier = 1.0;

    // Position from the newest end: newest -> 0
    let position = history
        .iter()
        .rev()
        .position(|played| played.eq_ignore_ascii_case(category));

    match position {
        Some(slot) => {
            let penalty = positional_penalty(config, slot);
            log.factor("Variety", &format!("{} seen {} back", category, slot), penalty);
            multiplier *= penalty;
        }
        None => {
            log.factor("Novelty", "category unseen in history", config.novelty_boost);
            multiplier *= config.novelty_boost;
        }
    }

    if let Some(newest) = history.last()
        && !newest.eq_ignore_ascii_case(category)
        && categories.same_group(category, newest)
    {
        log.factor(
            "Group",
            &format!("shares group with {}", newest),
            config.group_penalty,
        );
        multiplier *= config.group_penalty;
    }

    multiplier
}

fn positional_penalty(config: &VarietyConfig, slot: usize) -> f64 {
    if config.penalty_num <= 1 {
        return config.penalty_first;
    }
    if slot >= config.penalty_num - 1 {
        return config.penalty_last;
    }
    let t = slot as f64 / (config.penalty_num - 1) as f64;
    config.penalty_first + t * (config.penalty_last - config.penalty_first)
}
