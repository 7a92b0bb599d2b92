use super::model::{
    Color, Engine, GameType, Header, MapData, Player, PlayerType, Race, Speed, Tileset,
};
use chrono::{DateTime, Utc};

/// Uncompressed size of the header section
pub const HEADER_SIZE: usize = 0x279;

const PLAYERS_OFFSET: usize = 0xa1;
const PLAYER_SLOT_SIZE: usize = 36;
const PLAYER_SLOTS: usize = 12;
const COLORS_OFFSET: usize = 0x251;
const COLOR_SLOTS: usize = 8;

/// Size of one `UNIT` entry in scenario data
const CHK_UNIT_SIZE: usize = 36;

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Zero-terminated string from a fixed-size field. Text is decoded lossily
/// since older clients wrote local code pages.
fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Parse a header section. `data` must be exactly [`HEADER_SIZE`] bytes,
/// which the section reader guarantees.
pub fn parse_header(data: &[u8]) -> Header {
    debug_assert_eq!(data.len(), HEADER_SIZE);

    let start_time = DateTime::<Utc>::from_timestamp(i64::from(u32_at(data, 0x08)), 0)
        .unwrap_or_default();

    let players = (0..PLAYER_SLOTS)
        .filter_map(|slot| {
            let ps = &data[PLAYERS_OFFSET + slot * PLAYER_SLOT_SIZE..][..PLAYER_SLOT_SIZE];
            let player_type = PlayerType::from_id(ps[8]);
            let name = c_string(&ps[11..11 + 25]);
            if !matches!(player_type, PlayerType::Human | PlayerType::Computer) || name.is_empty() {
                return None;
            }
            let color = (slot < COLOR_SLOTS)
                .then(|| Color::from_id(u32_at(data, COLORS_OFFSET + slot * 4)));
            Some(Player {
                slot_id: u16_at(ps, 0),
                id: ps[4],
                player_type,
                race: Race::from_id(ps[9]),
                team: ps[10],
                name,
                color,
            })
        })
        .collect();

    Header {
        engine: Engine::from_id(data[0x00]),
        frames: u32_at(data, 0x01),
        start_time,
        title: c_string(&data[0x18..0x18 + 28]),
        map_width: u16_at(data, 0x34),
        map_height: u16_at(data, 0x36),
        avail_slots_count: data[0x39],
        speed: Speed::from_id(data[0x3a]),
        game_type: GameType::from_id(u16_at(data, 0x3c)),
        sub_type: u16_at(data, 0x3e),
        host: c_string(&data[0x48..0x48 + 24]),
        map: c_string(&data[0x61..0x61 + 26]),
        players,
    }
}

/// Walk the scenario sub-sections (`tag[4], size:u32, data`).
///
/// Protected maps use bogus sizes to confuse editors; walking stops at the
/// first sub-section that does not fit instead of failing.
pub fn parse_map_data(data: &[u8]) -> MapData {
    let mut map = MapData::default();
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let tag = &data[pos..pos + 4];
        let size = u32_at(data, pos + 4) as usize;
        pos += 8;
        let Some(body) = pos.checked_add(size).and_then(|end| data.get(pos..end)) else {
            break;
        };

        match tag {
            b"VER " if body.len() >= 2 => map.version = Some(u16_at(body, 0)),
            b"DIM " if body.len() >= 4 => {
                map.width = Some(u16_at(body, 0));
                map.height = Some(u16_at(body, 2));
            }
            b"ERA " if body.len() >= 2 => {
                map.tileset = Some(Tileset::from_id(u16_at(body, 0) & 0x07));
            }
            b"UNIT" => map.unit_count += body.len() / CHK_UNIT_SIZE,
            _ => {}
        }
        pos += size;
    }

    map
}
