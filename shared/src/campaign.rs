//! The shared campaign document: fragments, characters, pages of tokens,
//! veils, players and the chat log
//!
//! Two layers live here. The `*Record` types and [`CampaignData`] are the
//! persisted/wire schema and round-trip through JSON unchanged. [`Campaign`]
//! is the validated in-memory aggregate built from them: fragment geometry is
//! derived, references are resolved, and token ids are indexed.

use crate::error::CampaignError;
use crate::resources::ImageSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Highest document version this build understands
pub const FORMAT_VERSION: u32 = 1;

/// A point in map units
pub type Position = (f64, f64);

pub type TokenId = String;

/// Keys a record does not model, carried through load and save untouched
pub type Extra = Map<String, Value>;

/// Keeps `"field": null` distinguishable from a missing field.
///
/// `None` means absent (fall through to the next layer), `Some(None)` means
/// explicitly nobody.
fn explicit<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Map units as written to JSON: whole values without a fractional part,
/// so hand-written integer coordinates stay integers.
#[derive(Clone, Copy)]
struct Units(f64);

impl Serialize for Units {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        const EXACT: f64 = 9_007_199_254_740_992.0;
        if self.0.fract() == 0.0 && self.0.abs() < EXACT {
            serializer.serialize_i64(self.0 as i64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

fn units<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    Units(*value).serialize(serializer)
}

fn optional_units<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    value.map(Units).serialize(serializer)
}

fn optional_position<S: Serializer>(value: &Option<Position>, serializer: S) -> Result<S::Ok, S::Error> {
    value.map(|(x, y)| (Units(x), Units(y))).serialize(serializer)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub path: String,
    #[serde(default, serialize_with = "optional_units", skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, serialize_with = "optional_units", skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Image pixels per map unit
    #[serde(default, serialize_with = "optional_units", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
    #[serde(default, serialize_with = "optional_position", skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub hp: i32,
    pub maxhp: i32,
    #[serde(
        default,
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub player: Option<Option<String>>,
    pub fragment_id: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Editable, persisted fields of a token; also the `update_token` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: TokenId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default, serialize_with = "optional_position", skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(
        default,
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub player: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Axis-aligned fog-of-war rectangle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Veil {
    #[serde(serialize_with = "units")]
    pub minx: f64,
    #[serde(serialize_with = "units")]
    pub miny: f64,
    #[serde(serialize_with = "units")]
    pub maxx: f64,
    #[serde(serialize_with = "units")]
    pub maxy: f64,
    pub covered: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Veil {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64, covered: bool) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
            covered,
            extra: Extra::new(),
        }
    }

    /// Strict containment: points on the border are outside.
    pub fn strictly_contains(&self, x: f64, y: f64) -> bool {
        self.minx < x && x < self.maxx && self.miny < y && y < self.maxy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub tokens: Vec<TokenRecord>,
    /// `None` when the document never mentioned veils for this page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veils: Option<Vec<Veil>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub default_character: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl PlayerRecord {
    pub fn new(default_character: impl Into<String>) -> Self {
        Self {
            default_character: default_character.into(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Speaker, or `None` for the GM
    pub player: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl ChatEntry {
    pub fn new(player: Option<String>, text: impl Into<String>) -> Self {
        Self {
            player,
            text: text.into(),
            time: None,
        }
    }

    pub fn speaker(&self) -> &str {
        self.player.as_deref().unwrap_or("GM")
    }
}

/// The persisted document, exactly as it appears in `data.json`
///
/// Optional sections stay `None` when the file leaves them out, so a
/// document that never had a chat log is saved without one until somebody
/// speaks. Unknown top-level keys land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub fragments: BTreeMap<String, FragmentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<BTreeMap<String, Character>>,
    pub pages: Vec<PageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<BTreeMap<String, PlayerRecord>>,
    pub master_page: usize,
    pub players_page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Vec<ChatEntry>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Width, height and resolution after derivation from the image size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub width: f64,
    pub height: f64,
    pub resolution: f64,
}

impl Geometry {
    /// Derives the missing dimensions from the image's pixel size.
    ///
    /// Exactly one of `width` and `resolution` must be given.
    pub fn derive(id: &str, record: &FragmentRecord, pixels: (u32, u32)) -> Result<Self, CampaignError> {
        let invalid = |reason: &str| CampaignError::InvalidFragment {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        let (px_w, px_h) = (f64::from(pixels.0), f64::from(pixels.1));

        let (width, resolution) = match (record.width, record.resolution) {
            (Some(w), None) if w > 0.0 => (w, px_w / w),
            (None, Some(r)) if r > 0.0 => (px_w / r, r),
            (Some(_), None) => return Err(invalid("width must be positive")),
            (None, Some(_)) => return Err(invalid("resolution must be positive")),
            (Some(_), Some(_)) => return Err(invalid("both width and resolution given")),
            (None, None) => return Err(invalid("one of width or resolution is required")),
        };
        if resolution <= 0.0 {
            return Err(invalid("image has zero width"));
        }
        let height = record.height.unwrap_or(px_h / resolution);

        Ok(Self {
            width,
            height,
            resolution,
        })
    }
}

/// An immutable visual asset
#[derive(Debug, Clone)]
pub struct Fragment {
    id: String,
    record: FragmentRecord,
    geometry: Geometry,
}

impl Fragment {
    pub fn new(id: impl Into<String>, record: FragmentRecord, pixels: (u32, u32)) -> Result<Self, CampaignError> {
        let id = id.into();
        let geometry = Geometry::derive(&id, &record, pixels)?;
        Ok(Self { id, record, geometry })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.record.path
    }

    pub fn record(&self) -> &FragmentRecord {
        &self.record
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Width and height in map units.
    pub fn size(&self) -> (f64, f64) {
        (self.geometry.width, self.geometry.height)
    }

    /// Where tokens of this fragment sit when they have no position of
    /// their own. The origin if the fragment does not say.
    pub fn default_position(&self) -> Position {
        self.record.position.unwrap_or((0.0, 0.0))
    }
}

/// A placement of a fragment (directly or through a character) on a page
#[derive(Debug, Clone)]
pub struct Token {
    record: TokenRecord,
    /// Fragment resolved from the record or its character
    fragment_id: String,
    temp_position: Option<Position>,
}

impl Token {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &TokenRecord {
        &self.record
    }

    /// Fragment this token draws, resolved through its character if needed.
    pub fn fragment_id(&self) -> &str {
        &self.fragment_id
    }

    pub fn has_temp_position(&self) -> bool {
        self.temp_position.is_some()
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.temp_position = None;
        self.record.position = Some(position);
    }

    pub(crate) fn set_temp_position(&mut self, position: Position) {
        self.temp_position = Some(position);
    }

    pub(crate) fn temp_position_raw(&self) -> Option<Position> {
        self.temp_position
    }
}

/// Returns the first present candidate in priority order.
///
/// Used for token attributes that fall back from the token to its character
/// and then to its fragment.
pub fn resolve<T>(candidates: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    candidates.into_iter().flatten().next()
}

/// A token together with everything its attributes resolve through
#[derive(Debug, Clone, Copy)]
pub struct TokenView<'a> {
    pub token: &'a Token,
    pub fragment: &'a Fragment,
    pub character: Option<&'a Character>,
}

impl<'a> TokenView<'a> {
    pub fn id(&self) -> &'a str {
        self.token.id()
    }

    /// Committed position: the token's own, else the fragment default.
    pub fn position(&self) -> Position {
        self.token
            .record
            .position
            .unwrap_or_else(|| self.fragment.default_position())
    }

    /// Preview position while a move is in flight, else the committed one.
    pub fn temp_position(&self) -> Position {
        self.token.temp_position.unwrap_or_else(|| self.position())
    }

    /// Token override, then fragment default. Characters carry no kind.
    pub fn kind(&self) -> Option<&'a str> {
        resolve([
            self.token.record.kind.as_deref(),
            self.fragment.record.kind.as_deref(),
        ])
    }

    /// Token override, then character, then fragment.
    pub fn player(&self) -> Option<&'a str> {
        resolve([
            self.token.record.player.as_ref().map(Option::as_deref),
            self.character
                .and_then(|c| c.player.as_ref().map(Option::as_deref)),
            self.fragment.record.player.as_deref().map(Some),
        ])
        .flatten()
    }

    pub fn is_token(&self) -> bool {
        self.kind().is_some_and(|kind| kind.starts_with("token"))
    }

    /// The master (`None`) controls everything, a player only their own tokens.
    pub fn controlled_by(&self, player: Option<&str>) -> bool {
        match player {
            None => true,
            Some(name) => self.player() == Some(name),
        }
    }

    /// Inclusive footprint test at the committed position.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (tx, ty) = self.position();
        let (w, h) = self.fragment.size();
        tx <= x && x <= tx + w && ty <= y && y <= ty + h
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub(crate) tokens: Vec<Token>,
    pub(crate) veils: Vec<Veil>,
    /// The document listed veils for this page, possibly none
    has_veils: bool,
    extra: Extra,
}

impl Page {
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn veils(&self) -> &[Veil] {
        &self.veils
    }
}

/// Which optional top-level sections the loaded document spelled out
#[derive(Debug, Clone, Copy, Default)]
struct Sections {
    characters: bool,
    players: bool,
    chat: bool,
}

/// The validated, in-memory campaign
#[derive(Debug, Clone)]
pub struct Campaign {
    version: Option<u32>,
    extra: Extra,
    sections: Sections,
    fragments: BTreeMap<String, Fragment>,
    characters: BTreeMap<String, Character>,
    pub(crate) pages: Vec<Page>,
    players: BTreeMap<String, PlayerRecord>,
    pub(crate) master_page: usize,
    pub(crate) players_page: usize,
    pub(crate) chat: Vec<ChatEntry>,
    /// token id -> (page index, position in page)
    token_index: HashMap<TokenId, (usize, usize)>,
}

fn section<V: Clone>(declared: bool, map: &BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (declared || !map.is_empty()).then(|| map.clone())
}

impl Campaign {
    /// Builds and validates a campaign, reading image sizes from `images`.
    pub fn load(data: CampaignData, images: &dyn ImageSource) -> Result<Self, CampaignError> {
        if let Some(version) = data.version.filter(|v| *v > FORMAT_VERSION) {
            return Err(CampaignError::UnsupportedVersion(version));
        }
        if data.pages.is_empty() {
            return Err(CampaignError::NoPages);
        }
        for (cursor, index) in [("master_page", data.master_page), ("players_page", data.players_page)] {
            if index >= data.pages.len() {
                return Err(CampaignError::CursorOutOfRange {
                    cursor,
                    index,
                    len: data.pages.len(),
                });
            }
        }

        let sections = Sections {
            characters: data.characters.is_some(),
            players: data.players.is_some(),
            chat: data.chat.is_some(),
        };
        let characters = data.characters.unwrap_or_default();
        let players = data.players.unwrap_or_default();

        let mut fragments = BTreeMap::new();
        for (id, record) in data.fragments {
            let pixels = images.pixel_size(&record.path)?;
            let fragment = Fragment::new(id.clone(), record, pixels)?;
            fragments.insert(id, fragment);
        }

        for (id, character) in &characters {
            if !fragments.contains_key(&character.fragment_id) {
                return Err(CampaignError::UnknownFragment {
                    token: format!("character {id}"),
                    fragment: character.fragment_id.clone(),
                });
            }
        }
        for (name, player) in &players {
            if !characters.contains_key(&player.default_character) {
                return Err(CampaignError::UnknownCharacter {
                    owner: format!("player {name}"),
                    character: player.default_character.clone(),
                });
            }
        }

        let mut campaign = Campaign {
            version: data.version,
            extra: data.extra,
            sections,
            fragments,
            characters,
            pages: Vec::with_capacity(data.pages.len()),
            players,
            master_page: data.master_page,
            players_page: data.players_page,
            chat: data.chat.unwrap_or_default(),
            token_index: HashMap::new(),
        };

        for (page_idx, page_record) in data.pages.into_iter().enumerate() {
            let mut page = Page {
                tokens: Vec::with_capacity(page_record.tokens.len()),
                has_veils: page_record.veils.is_some(),
                veils: page_record.veils.unwrap_or_default(),
                extra: page_record.extra,
            };
            for record in page_record.tokens {
                let fragment_id = campaign.fragment_for(&record)?;
                let index = (page_idx, page.tokens.len());
                if campaign.token_index.insert(record.id.clone(), index).is_some() {
                    return Err(CampaignError::DuplicateToken(record.id));
                }
                page.tokens.push(Token {
                    record,
                    fragment_id,
                    temp_position: None,
                });
            }
            campaign.pages.push(page);
        }

        Ok(campaign)
    }

    /// Resolves the fragment a token record draws, directly or via its character.
    pub(crate) fn fragment_for(&self, record: &TokenRecord) -> Result<String, CampaignError> {
        let fragment_id = match (&record.fragment_id, &record.character_id) {
            (Some(fragment_id), None) => fragment_id.clone(),
            (None, Some(character_id)) => self
                .characters
                .get(character_id)
                .map(|c| c.fragment_id.clone())
                .ok_or_else(|| CampaignError::UnknownCharacter {
                    owner: format!("token {}", record.id),
                    character: character_id.clone(),
                })?,
            _ => return Err(CampaignError::AmbiguousToken(record.id.clone())),
        };
        if !self.fragments.contains_key(&fragment_id) {
            return Err(CampaignError::UnknownFragment {
                token: record.id.clone(),
                fragment: fragment_id,
            });
        }
        Ok(fragment_id)
    }

    /// Serializable snapshot; temp positions are not part of it.
    ///
    /// Sections the loaded document left out stay out while they are empty.
    pub fn to_data(&self) -> CampaignData {
        CampaignData {
            version: self.version,
            fragments: self
                .fragments
                .iter()
                .map(|(id, f)| (id.clone(), f.record.clone()))
                .collect(),
            characters: section(self.sections.characters, &self.characters),
            pages: self
                .pages
                .iter()
                .map(|page| PageRecord {
                    tokens: page.tokens.iter().map(|t| t.record.clone()).collect(),
                    veils: (page.has_veils || !page.veils.is_empty()).then(|| page.veils.clone()),
                    extra: page.extra.clone(),
                })
                .collect(),
            players: section(self.sections.players, &self.players),
            master_page: self.master_page,
            players_page: self.players_page,
            chat: (self.sections.chat || !self.chat.is_empty()).then(|| self.chat.clone()),
            extra: self.extra.clone(),
        }
    }

    /// Every fragment by id, with derived geometry.
    pub fn fragments(&self) -> &BTreeMap<String, Fragment> {
        &self.fragments
    }

    pub fn fragment(&self, id: &str) -> Option<&Fragment> {
        self.fragments.get(id)
    }

    /// Every character by id; empty when the document has none.
    pub fn characters(&self) -> &BTreeMap<String, Character> {
        &self.characters
    }

    pub fn character(&self, id: &str) -> Option<&Character> {
        self.characters.get(id)
    }

    /// Known players by name and the character each plays by default.
    pub fn players(&self) -> &BTreeMap<String, PlayerRecord> {
        &self.players
    }

    pub fn player(&self, name: &str) -> Option<&PlayerRecord> {
        self.players.get(name)
    }

    pub fn default_character(&self, name: &str) -> Option<&Character> {
        self.player(name)
            .and_then(|p| self.character(&p.default_character))
    }

    /// Pages in document order. Page ids on the wire are indices here.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Page the master is looking at.
    pub fn master_page(&self) -> usize {
        self.master_page
    }

    /// Page shown to every player.
    pub fn players_page(&self) -> usize {
        self.players_page
    }

    /// The chat log, oldest first.
    pub fn chat(&self) -> &[ChatEntry] {
        &self.chat
    }

    pub(crate) fn token_location(&self, id: &str) -> Option<(usize, usize)> {
        self.token_index.get(id).copied()
    }

    /// Looks a token up by id on any page.
    pub fn token(&self, id: &str) -> Option<&Token> {
        let (page, slot) = self.token_location(id)?;
        self.pages.get(page)?.tokens.get(slot)
    }

    pub(crate) fn token_mut(&mut self, id: &str) -> Option<&mut Token> {
        let (page, slot) = self.token_location(id)?;
        self.pages.get_mut(page)?.tokens.get_mut(slot)
    }

    /// Attaches the fragment and character a token resolves through.
    pub fn view<'a>(&'a self, token: &'a Token) -> TokenView<'a> {
        let character = token
            .record
            .character_id
            .as_deref()
            .and_then(|id| self.characters.get(id));
        TokenView {
            token,
            // Invariant: every token's fragment was resolved at load or replace.
            fragment: &self.fragments[&token.fragment_id],
            character,
        }
    }

    pub fn token_view(&self, id: &str) -> Option<TokenView<'_>> {
        self.token(id).map(|token| self.view(token))
    }

    pub(crate) fn replace_token_record(&mut self, record: TokenRecord, fragment_id: String) -> bool {
        match self.token_mut(&record.id) {
            Some(token) => {
                token.record = record;
                token.fragment_id = fragment_id;
                token.temp_position = None;
                true
            }
            None => false,
        }
    }
}
