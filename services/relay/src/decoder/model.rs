use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Declares an id-coded enumeration with display names and the `{"Name","ID"}`
/// serialization. Unrecognized ids are kept as `Unknown(id)`.
macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident : $repr:ty { $($variant:ident = $id:literal => $label:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant,)+
            Unknown($repr),
        }

        impl $name {
            pub fn from_id(id: $repr) -> Self {
                match id {
                    $($id => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }

            pub fn id(self) -> $repr {
                match self {
                    $($name::$variant => $id,)+
                    $name::Unknown(id) => id,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                    $name::Unknown(_) => "Unknown",
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut s = serializer.serialize_struct(stringify!($name), 2)?;
                s.serialize_field("Name", self.name())?;
                s.serialize_field("ID", &self.id())?;
                s.end()
            }
        }
    };
}

named_enum!(
    /// Game engine the replay was recorded with
    Engine: u8 {
        StarCraft = 0 => "StarCraft",
        BroodWar = 1 => "Brood War",
    }
);

named_enum!(
    /// Game speed
    Speed: u8 {
        Slowest = 0 => "Slowest",
        Slower = 1 => "Slower",
        Slow = 2 => "Slow",
        Normal = 3 => "Normal",
        Fast = 4 => "Fast",
        Faster = 5 => "Faster",
        Fastest = 6 => "Fastest",
    }
);

named_enum!(
    /// Game type
    GameType: u16 {
        Melee = 2 => "Melee",
        FreeForAll = 3 => "Free For All",
        OneOnOne = 4 => "One on One",
        CaptureTheFlag = 5 => "Capture The Flag",
        Greed = 6 => "Greed",
        Slaughter = 7 => "Slaughter",
        SuddenDeath = 8 => "Sudden Death",
        Ladder = 9 => "Ladder",
        UseMapSettings = 10 => "Use map settings",
        TeamMelee = 11 => "Team Melee",
        TeamFreeForAll = 12 => "Team Free For All",
        TeamCaptureTheFlag = 13 => "Team Capture The Flag",
        TopVsBottom = 15 => "Top vs Bottom",
    }
);

named_enum!(
    /// Slot controller type
    PlayerType: u8 {
        Inactive = 0 => "Inactive",
        Computer = 1 => "Computer",
        Human = 2 => "Human",
        RescuePassive = 3 => "Rescue Passive",
        ComputerControlled = 5 => "Computer Controlled",
        Open = 6 => "Open",
        Neutral = 7 => "Neutral",
        Closed = 8 => "Closed",
    }
);

named_enum!(
    Race: u8 {
        Zerg = 0 => "Zerg",
        Terran = 1 => "Terran",
        Protoss = 2 => "Protoss",
        Random = 6 => "Random",
    }
);

named_enum!(
    Color: u32 {
        Red = 0 => "Red",
        Blue = 1 => "Blue",
        Teal = 2 => "Teal",
        Purple = 3 => "Purple",
        Orange = 4 => "Orange",
        Brown = 5 => "Brown",
        White = 6 => "White",
        Yellow = 7 => "Yellow",
        Green = 8 => "Green",
        PaleYellow = 9 => "Pale Yellow",
        Tan = 10 => "Tan",
        Azure = 11 => "Azure",
    }
);

named_enum!(
    /// Map tileset
    Tileset: u16 {
        Badlands = 0 => "Badlands",
        SpacePlatform = 1 => "Space Platform",
        Installation = 2 => "Installation",
        Ashworld = 3 => "Ashworld",
        Jungle = 4 => "Jungle",
        Desert = 5 => "Desert",
        Arctic = 6 => "Arctic",
        Twilight = 7 => "Twilight",
    }
);

impl Race {
    /// One-letter abbreviation used in matchups
    pub fn letter(self) -> char {
        match self {
            Race::Zerg => 'Z',
            Race::Terran => 'T',
            Race::Protoss => 'P',
            Race::Random => 'R',
            Race::Unknown(_) => '?',
        }
    }
}

/// A decoded replay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Replay {
    pub header: Header,
    pub map_data: MapData,
    /// Size of the raw command stream in bytes
    pub commands_size: usize,
    /// Derived data, filled in by annotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed: Option<Computed>,
}

/// Replay header
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    pub engine: Engine,
    /// Game length in frames
    pub frames: u32,
    pub start_time: DateTime<Utc>,
    pub title: String,
    pub map_width: u16,
    pub map_height: u16,
    pub avail_slots_count: u8,
    pub speed: Speed,
    #[serde(rename = "Type")]
    pub game_type: GameType,
    pub sub_type: u16,
    pub host: String,
    pub map: String,
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    #[serde(rename = "SlotID")]
    pub slot_id: u16,
    #[serde(rename = "ID")]
    pub id: u8,
    #[serde(rename = "Type")]
    pub player_type: PlayerType,
    pub race: Race,
    pub team: u8,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

/// Summary of the embedded scenario (CHK) data
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapData {
    pub version: Option<u16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub tileset: Option<Tileset>,
    /// Number of pre-placed units (resources, start locations, ...)
    pub unit_count: usize,
}

/// Data derived from a decoded replay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Computed {
    #[serde(rename = "DurationMS")]
    pub duration_ms: u64,
    /// Duration formatted as `h:mm:ss` or `m:ss`
    pub duration: String,
    /// Races per team, e.g. `PvT` or `PTvZZ`
    pub matchup: String,
    pub player_count: usize,
    pub teams: Vec<TeamRoster>,
    /// Map dimensions as `WxH`
    pub map_size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TeamRoster {
    pub team: u8,
    pub players: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_enum_lookup() {
        assert_eq!(Race::from_id(2), Race::Protoss);
        assert_eq!(Race::from_id(9), Race::Unknown(9));
        assert_eq!(Race::Unknown(9).id(), 9);
        assert_eq!(Engine::BroodWar.name(), "Brood War");
        assert_eq!(Tileset::from_id(4).name(), "Jungle");
    }

    #[test]
    fn test_named_enum_serializes_name_and_id() {
        let json = serde_json::to_value(Speed::Fastest).unwrap();
        assert_eq!(json, serde_json::json!({"Name": "Fastest", "ID": 6}));

        let json = serde_json::to_value(GameType::Unknown(99)).unwrap();
        assert_eq!(json, serde_json::json!({"Name": "Unknown", "ID": 99}));
    }

    #[test]
    fn test_race_letters() {
        let letters: String = [Race::Protoss, Race::Terran, Race::Zerg, Race::Random]
            .iter()
            .map(|r| r.letter())
            .collect();
        assert_eq!(letters, "PTZR");
    }
}
