use rand::seq::SliceRandom;
use rand::Rng;

pub const REMINDER_TITLE: &str = "Reconnect with your intention";
pub const AMBIENT_TITLE: &str = "A mindful moment";

pub const ENCOURAGEMENTS: [&str; 6] = [
    "Take a breath and check in with today's intention.",
    "How are you feeling right now? Notice it without judgement.",
    "Pause for a moment. What matters most this afternoon?",
    "Small steps count. Revisit the intention you set.",
    "Name one emotion you are carrying right now.",
    "You set an intention today. Is it still guiding you?",
];

pub const AMBIENT_PHRASES: [&str; 5] = [
    "Breathe in. Breathe out.",
    "Notice this moment.",
    "Soften your shoulders.",
    "Where is your attention?",
    "Return to your intention.",
];

/// Deterministic for a given slot: rotates through the pool.
pub fn encouragement_for_slot(slot: usize) -> &'static str {
    ENCOURAGEMENTS[slot % ENCOURAGEMENTS.len()]
}

pub fn random_phrase<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    AMBIENT_PHRASES.choose(rng).copied().unwrap_or(AMBIENT_PHRASES[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_rotate_through_the_pool() {
        assert_eq!(encouragement_for_slot(0), ENCOURAGEMENTS[0]);
        assert_eq!(encouragement_for_slot(5), ENCOURAGEMENTS[5]);
        assert_eq!(encouragement_for_slot(6), ENCOURAGEMENTS[0]);
        let distinct: std::collections::HashSet<_> = (0..ENCOURAGEMENTS.len()).map(encouragement_for_slot).collect();
        assert_eq!(distinct.len(), ENCOURAGEMENTS.len());
    }

    #[test]
    fn random_phrase_comes_from_pool() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            assert!(AMBIENT_PHRASES.contains(&random_phrase(&mut rng)));
        }
    }
}
