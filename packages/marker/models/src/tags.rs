//! Predefined marker tags.
//!
//! Tags are free strings on the marker itself; these groups are the
//! catalog offered when publishing and filtering.

/// Which animal was seen.
pub mod animal {
    /// Dog.
    pub const DOG: &str = "Dog";
    /// Cat.
    pub const CAT: &str = "Cat";
    /// Snake.
    pub const SNAKE: &str = "Snake";
    /// Bird.
    pub const BIRD: &str = "Bird";

    /// Every tag in this group.
    pub const ALL: &[&str] = &[DOG, CAT, SNAKE, BIRD];
}

/// Domestic, wild or stray.
pub mod animal_type {
    /// Domestic animal.
    pub const DOMESTIC: &str = "Domestic Animal";
    /// Wild animal.
    pub const WILD: &str = "Wild Animal";
    /// Stray.
    pub const STRAY: &str = "Stray";

    /// Every tag in this group.
    pub const ALL: &[&str] = &[DOMESTIC, WILD, STRAY];
}

/// Condition of the animal.
pub mod animal_state {
    /// Hungry.
    pub const HUNGRY: &str = "Hungry";
    /// Thirsty.
    pub const THIRSTY: &str = "Thirsty";
    /// Wounded.
    pub const WOUNDED: &str = "Wounded";
    /// Bleeding.
    pub const BLEEDING: &str = "Bleeding";
    /// Dead.
    pub const DEAD: &str = "Dead";

    /// Every tag in this group.
    pub const ALL: &[&str] = &[HUNGRY, THIRSTY, WOUNDED, BLEEDING, DEAD];
}

/// How the animal behaves.
pub mod behaviour {
    /// Aggressive.
    pub const AGGRESSIVE: &str = "Aggressive";
    /// Passive.
    pub const PASSIVE: &str = "Passive";
    /// Scared.
    pub const SCARED: &str = "Scared";
    /// Not scared.
    pub const NOT_SCARED: &str = "Not Scared";
    /// Playful.
    pub const PLAYFUL: &str = "Playful";

    /// Every tag in this group.
    pub const ALL: &[&str] = &[AGGRESSIVE, PASSIVE, SCARED, NOT_SCARED, PLAYFUL];
}

/// All catalog tags across groups.
#[must_use]
pub fn all() -> Vec<&'static str> {
    animal::ALL
        .iter()
        .chain(animal_type::ALL)
        .chain(animal_state::ALL)
        .chain(behaviour::ALL)
        .copied()
        .collect()
}

/// Whether `tag` belongs to the catalog.
#[must_use]
pub fn is_known(tag: &str) -> bool {
    all().contains(&tag)
}
