//! The 108-card deck: pure arithmetic over card ids 0..=107.
//!
//! Each color owns a group of 25 ids: one 0, two each of 1-9, two Skips, two
//! Reverses, two Draw-Twos. Ids 100-103 are Wilds, 104-107 Wild-Draw-Fours.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of cards in a fresh deck.
pub const DECK_SIZE: usize = 108;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardColor {
    Red,
    Yellow,
    Green,
    Blue,
}

impl CardColor {
    pub const ALL: [CardColor; 4] = [
        CardColor::Red,
        CardColor::Yellow,
        CardColor::Green,
        CardColor::Blue,
    ];

    pub fn from_index(index: u8) -> Option<CardColor> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        match self {
            CardColor::Red => 0,
            CardColor::Yellow => 1,
            CardColor::Green => 2,
            CardColor::Blue => 3,
        }
    }
}

impl fmt::Display for CardColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardColor::Red => "Red",
            CardColor::Yellow => "Yellow",
            CardColor::Green => "Green",
            CardColor::Blue => "Blue",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardValue {
    /// 0-9 face value.
    Digit(u8),
    Skip,
    Reverse,
    DrawTwo,
    Wild,
    WildDrawFour,
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Digit(d) => write!(f, "{d}"),
            CardValue::Skip => f.write_str("Skip"),
            CardValue::Reverse => f.write_str("Reverse"),
            CardValue::DrawTwo => f.write_str("DrawTwo"),
            CardValue::Wild => f.write_str("Wild"),
            CardValue::WildDrawFour => f.write_str("WildDrawFour"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Card(u8);

impl Card {
    pub fn new(id: u8) -> Option<Card> {
        if (id as usize) < DECK_SIZE {
            Some(Card(id))
        } else {
            None
        }
    }

    pub fn id(self) -> u8 {
        self.0
    }

    /// Wild cards have no inherent color.
    pub fn color(self) -> Option<CardColor> {
        if self.0 >= 100 {
            None
        } else {
            CardColor::from_index(self.0 / 25)
        }
    }

    pub fn value(self) -> CardValue {
        if self.0 >= 104 {
            return CardValue::WildDrawFour;
        }
        if self.0 >= 100 {
            return CardValue::Wild;
        }
        match self.0 % 25 {
            23..=24 => CardValue::DrawTwo,
            21..=22 => CardValue::Reverse,
            19..=20 => CardValue::Skip,
            v @ 10..=18 => CardValue::Digit(v - 9),
            v => CardValue::Digit(v),
        }
    }

    pub fn is_wild(self) -> bool {
        matches!(self.value(), CardValue::Wild | CardValue::WildDrawFour)
    }

    /// Whether this card may be discarded onto `top`. `last_wild_color` is the
    /// color declared for the top card and is only meaningful when the top
    /// card is wild.
    pub fn can_play_on(self, top: Card, last_wild_color: Option<CardColor>) -> bool {
        if self.is_wild() {
            return true;
        }
        if self.value() == top.value() {
            return true;
        }
        if self.color().is_some() && self.color() == top.color() {
            return true;
        }
        top.is_wild() && last_wild_color.is_some() && last_wild_color == self.color()
    }

    pub fn score(self) -> u32 {
        match self.value() {
            CardValue::Wild | CardValue::WildDrawFour => 50,
            CardValue::Skip | CardValue::Reverse | CardValue::DrawTwo => 20,
            CardValue::Digit(d) => u32::from(d),
        }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.color() {
            Some(color) => write!(f, "{}-{}", color, self.value()),
            None => write!(f, "{}", self.value()),
        }
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Card({}: {})", self.0, self)
    }
}

/// All 108 cards in id order.
pub fn full_deck() -> Vec<Card> {
    (0..DECK_SIZE as u8).map(Card).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_distribution_per_color() {
        for color in CardColor::ALL {
            let group: Vec<Card> = full_deck()
                .into_iter()
                .filter(|c| c.color() == Some(color))
                .collect();
            assert_eq!(group.len(), 25);
            let digit_count = |d: u8| {
                group
                    .iter()
                    .filter(|c| c.value() == CardValue::Digit(d))
                    .count()
            };
            assert_eq!(digit_count(0), 1);
            for d in 1..=9 {
                assert_eq!(digit_count(d), 2, "digit {d} of {color}");
            }
            for value in [CardValue::Skip, CardValue::Reverse, CardValue::DrawTwo] {
                assert_eq!(group.iter().filter(|c| c.value() == value).count(), 2);
            }
        }
        let wilds: Vec<Card> = full_deck().into_iter().filter(|c| c.is_wild()).collect();
        assert_eq!(wilds.len(), 8);
    }

    #[test]
    fn playable_card_matches() {
        // Top discard is Red-5; value match, color match, and wild all play.
        let top = Card::new(5).unwrap();
        assert!(Card::new(30).unwrap().can_play_on(top, None)); // Yellow-5
        assert!(Card::new(7).unwrap().can_play_on(top, None)); // Red-7
        assert!(Card::new(100).unwrap().can_play_on(top, None)); // Wild
        assert!(!Card::new(31).unwrap().can_play_on(top, None)); // Yellow-6
    }

    #[test]
    fn wild_color_discipline() {
        let top = Card::new(100).unwrap();
        let blue = Some(CardColor::Blue);
        assert!(Card::new(75).unwrap().can_play_on(top, blue)); // Blue-0
        assert!(!Card::new(50).unwrap().can_play_on(top, blue)); // Green-0
    }

    #[test]
    fn scores() {
        assert_eq!(Card::new(0).unwrap().score(), 0);
        assert_eq!(Card::new(14).unwrap().score(), 5); // Red-5 (second copy)
        assert_eq!(Card::new(19).unwrap().score(), 20); // Skip
        assert_eq!(Card::new(21).unwrap().score(), 20); // Reverse
        assert_eq!(Card::new(23).unwrap().score(), 20); // DrawTwo
        assert_eq!(Card::new(100).unwrap().score(), 50);
        assert_eq!(Card::new(107).unwrap().score(), 50);
    }

    #[test]
    fn wilds_have_no_color() {
        for id in 100..108 {
            assert!(Card::new(id).unwrap().color().is_none());
            assert!(Card::new(id).unwrap().is_wild());
        }
    }

    #[test]
    fn id_bounds() {
        assert!(Card::new(107).is_some());
        assert!(Card::new(108).is_none());
    }
}
