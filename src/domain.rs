// Std library
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

// External crates
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Serialize, Serializer};

// Local modules
use crate::error::ScheduleError;

/// Parses a game length written as `H[:M[:S]]`.
///
/// Between one and three colon-separated fields are accepted; every field
/// must be a non-negative integer.
///
/// # Arguments
/// * `s` - The string to parse, for example `"2"`, `"1:30"` or `"2:0:0"`.
///
/// # Returns
/// The parsed `TimeDelta`, or `InvalidInput` when the string does not match
/// the `H[:M[:S]]` shape.
///
/// # Example
/// ```
/// use drawgen::domain::game_length_from_str;
///
/// let length = game_length_from_str("2:30:00").unwrap();
/// assert_eq!(length.num_minutes(), 150);
/// ```
pub fn game_length_from_str(s: &str) -> Result<TimeDelta, ScheduleError> {
    let fields: Vec<&str> = s.trim().split(':').collect();
    if fields.is_empty() || fields.len() > 3 {
        return Err(ScheduleError::InvalidInput(format!(
            "could not parse H[:M[:S]] from string {s:?}"
        )));
    }
    let mut parts = [0i64; 3];
    for (slot, field) in parts.iter_mut().zip(&fields) {
        *slot = field.trim().parse::<u32>().map_err(|_| {
            ScheduleError::InvalidInput(format!("could not parse H[:M[:S]] from string {s:?}"))
        })? as i64;
    }
    Ok(TimeDelta::hours(parts[0]) + TimeDelta::minutes(parts[1]) + TimeDelta::seconds(parts[2]))
}

/// Formats a game length as unpadded `H:M:S`, the inverse of
/// [`game_length_from_str`].
pub fn game_length_to_str(length: &TimeDelta) -> String {
    let total = length.num_seconds();
    format!("{}:{}:{}", total / 3600, total % 3600 / 60, total % 60)
}

fn serialize_game_length<S>(length: &Option<TimeDelta>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match length {
        Some(delta) => serializer.serialize_some(&game_length_to_str(delta)),
        None => serializer.serialize_none(),
    }
}

/// Day of the week, ISO convention (Monday first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// The weekday of a calendar date.
    pub fn from_date(date: NaiveDate) -> Weekday {
        match date.weekday() {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }

    /// The first date greater than or equal to `date` that falls on
    /// `weekday`. Returns `date` itself when it already matches.
    ///
    /// # Example
    /// ```
    /// use chrono::NaiveDate;
    /// use drawgen::domain::Weekday;
    ///
    /// let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    /// assert_eq!(Weekday::next_on_or_after(monday, Weekday::Monday), monday);
    /// assert_eq!(
    ///     Weekday::next_on_or_after(monday, Weekday::Sunday),
    ///     NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()
    /// );
    /// ```
    pub fn next_on_or_after(date: NaiveDate, weekday: Weekday) -> NaiveDate {
        let current = date.weekday().num_days_from_monday() as i64;
        let target = weekday.days_from_monday() as i64;
        let ahead = (target - current).rem_euclid(7);
        date + TimeDelta::days(ahead)
    }

    fn days_from_monday(self) -> u32 {
        match self {
            Weekday::Monday => 0,
            Weekday::Tuesday => 1,
            Weekday::Wednesday => 2,
            Weekday::Thursday => 3,
            Weekday::Friday => 4,
            Weekday::Saturday => 5,
            Weekday::Sunday => 6,
        }
    }

    /// The full English name of the weekday.
    pub fn name(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl FromStr for Weekday {
    type Err = ScheduleError;

    /// Parses a weekday label. Full names and the common abbreviations are
    /// accepted, case-insensitively, with an optional trailing period.
    fn from_str(label: &str) -> Result<Weekday, ScheduleError> {
        let trimmed = label.trim().trim_end_matches('.');
        match trimmed.to_lowercase().as_str() {
            "monday" | "mon" => Ok(Weekday::Monday),
            "tuesday" | "tu" | "tue" | "tues" => Ok(Weekday::Tuesday),
            "wednesday" | "wed" => Ok(Weekday::Wednesday),
            "thursday" | "th" | "thu" | "thur" | "thurs" => Ok(Weekday::Thursday),
            "friday" | "fri" => Ok(Weekday::Friday),
            "saturday" | "sat" => Ok(Weekday::Saturday),
            "sunday" | "sun" => Ok(Weekday::Sunday),
            _ => Err(ScheduleError::InvalidInput(format!(
                "{label:?} is not a weekday"
            ))),
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static SHEET_USE_LETTERS: AtomicBool = AtomicBool::new(false);

/// A playing location.
///
/// `Opaque` venues carry an arbitrary tag. `Sheet` venues are numbered 1..N
/// and may also be written as capital letters (`A` is sheet 1) when the
/// process-wide letter flag is enabled. Venues of different variants are
/// never equal; ordering across variants falls back to the variant name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Venue {
    Opaque(String),
    Sheet(i32),
}

/// The concrete venue variant, used to dispatch CSV parsing and to name the
/// venue column of a schedule file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VenueKind {
    Opaque,
    Sheet,
}

impl VenueKind {
    /// The header name of this variant.
    pub fn name(self) -> &'static str {
        match self {
            VenueKind::Opaque => "Venue",
            VenueKind::Sheet => "Sheet",
        }
    }

    /// Looks a variant up by header name. Unknown names fall back to
    /// `Opaque`, which accepts any cell content.
    pub fn from_name(name: &str) -> VenueKind {
        match name.trim() {
            "Sheet" => VenueKind::Sheet,
            _ => VenueKind::Opaque,
        }
    }

    /// Parses a venue cell of this variant.
    ///
    /// Sheets accept a number (`"2"`) or a single letter (`"b"`), both
    /// meaning sheet 2. Anything else fails with `InvalidInput`.
    pub fn parse(self, cell: &str) -> Result<Venue, ScheduleError> {
        let cell = cell.trim();
        match self {
            VenueKind::Opaque => Ok(Venue::Opaque(cell.to_string())),
            VenueKind::Sheet => {
                if let Ok(number) = cell.parse::<i32>() {
                    return Ok(Venue::Sheet(number));
                }
                let lowered = cell.to_lowercase();
                let mut chars = lowered.chars();
                match (chars.next(), chars.next()) {
                    (Some(letter), None) if letter.is_ascii_lowercase() => {
                        Ok(Venue::Sheet(letter as i32 - 'a' as i32 + 1))
                    }
                    _ => Err(ScheduleError::InvalidInput(format!(
                        "{cell:?} is not a valid sheet id"
                    ))),
                }
            }
        }
    }
}

impl Venue {
    /// Builds a sheet venue.
    pub fn sheet(number: i32) -> Venue {
        Venue::Sheet(number)
    }

    /// The variant of this venue.
    pub fn kind(&self) -> VenueKind {
        match self {
            Venue::Opaque(_) => VenueKind::Opaque,
            Venue::Sheet(_) => VenueKind::Sheet,
        }
    }

    /// The header name of this venue's variant.
    pub fn variant_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Switches sheet stringification between numbers and capital letters.
    ///
    /// This is a process-wide display flag. Set it once at startup, before
    /// any sheet is stringified.
    pub fn set_sheet_letters(enable: bool) {
        SHEET_USE_LETTERS.store(enable, AtomicOrdering::SeqCst);
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Opaque(tag) => f.write_str(tag),
            Venue::Sheet(number) => {
                if SHEET_USE_LETTERS.load(AtomicOrdering::SeqCst) && (1..=26).contains(number) {
                    write!(f, "{}", (b'A' + (number - 1) as u8) as char)
                } else {
                    write!(f, "{number}")
                }
            }
        }
    }
}

impl PartialOrd for Venue {
    fn partial_cmp(&self, other: &Venue) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Venue {
    fn cmp(&self, other: &Venue) -> Ordering {
        match (self, other) {
            (Venue::Opaque(a), Venue::Opaque(b)) => a.cmp(b),
            (Venue::Sheet(a), Venue::Sheet(b)) => a.cmp(b),
            _ => self.variant_name().cmp(other.variant_name()),
        }
    }
}

/// A competing rink: a name plus its member list.
///
/// Members are sorted on construction so that equality and ordering ignore
/// the order members were listed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Team {
    name: String,
    members: Vec<String>,
}

impl Team {
    /// Creates a team, normalizing the member list.
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Team {
        let mut members = members;
        members.sort();
        Team {
            name: name.into(),
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl PartialOrd for Team {
    fn partial_cmp(&self, other: &Team) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Team {
    fn cmp(&self, other: &Team) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.members.len().cmp(&other.members.len()))
            .then_with(|| self.members.cmp(&other.members))
    }
}

/// A scheduled game slot: a calendar day, a wall-clock start time, an
/// optional duration and an optional venue.
///
/// Two slots overlap when their half-open `[start, end)` intervals
/// intersect; equal starts or equal ends always count as overlap, which
/// means back-to-back games sharing a boundary instant exclude each other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Game {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(serialize_with = "serialize_game_length")]
    pub length: Option<TimeDelta>,
    pub venue: Option<Venue>,
}

impl Game {
    pub fn new(
        date: NaiveDate,
        start_time: NaiveTime,
        length: Option<TimeDelta>,
        venue: Option<Venue>,
    ) -> Game {
        Game {
            date,
            start_time,
            length,
            venue,
        }
    }

    /// The starting instant of the game.
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// The ending instant, when a length is known.
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.length.map(|length| self.start() + length)
    }

    /// True when the two games contest the same span of time.
    ///
    /// Equal starts or equal ends count as overlap. Otherwise both games
    /// need an end instant and the half-open intervals are compared.
    pub fn overlaps(&self, other: &Game) -> bool {
        if self.start() == other.start() || self.end() == other.end() {
            return true;
        }
        match (self.end(), other.end()) {
            (Some(self_end), Some(other_end)) => {
                if self.start() < other.start() {
                    other.start() < self_end
                } else {
                    self.start() < other_end
                }
            }
            _ => false,
        }
    }

    /// True when the two games touch a common calendar day, counting both
    /// the start day and the end day of each.
    pub fn same_day(&self, other: &Game) -> bool {
        self.touched_dates()
            .iter()
            .any(|date| other.touched_dates().contains(date))
    }

    /// The calendar days this game's span touches.
    pub fn touched_dates(&self) -> Vec<NaiveDate> {
        let mut dates = vec![self.date];
        if let Some(end) = self.end() {
            if end.date() != self.date {
                dates.push(end.date());
            }
        }
        dates
    }

    /// The canonical CSV cell form of the slot, teams excluded.
    pub fn to_csv(&self) -> String {
        let length = self
            .length
            .as_ref()
            .map(game_length_to_str)
            .unwrap_or_default();
        let venue = self
            .venue
            .as_ref()
            .map(Venue::to_string)
            .unwrap_or_default();
        format!(
            "{}, {}, {}, {}",
            self.date.format("%Y-%m-%d"),
            self.start_time.format("%H:%M:%S"),
            length,
            venue
        )
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "{} to {}", self.start(), end)?,
            None => write!(f, "{} to ?", self.start())?,
        }
        match &self.venue {
            Some(venue) => write!(f, " at {venue}"),
            None => write!(f, " at ?"),
        }
    }
}

impl PartialOrd for Game {
    fn partial_cmp(&self, other: &Game) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Game {
    /// Lexicographic order on date, start time, length and venue. A missing
    /// length sorts after every known length.
    fn cmp(&self, other: &Game) -> Ordering {
        self.date
            .cmp(&other.date)
            .then(self.start_time.cmp(&other.start_time))
            .then_with(|| match (&self.length, &other.length) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.venue.cmp(&other.venue))
    }
}

/// A moment a team is unavailable: either a whole day or one exact start
/// instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TimeMarker {
    Date(NaiveDate),
    Instant(NaiveDateTime),
}

impl TimeMarker {
    /// True when a game's start falls under this marker.
    pub fn matches(&self, game: &Game) -> bool {
        match self {
            TimeMarker::Date(date) => game.start().date() == *date,
            TimeMarker::Instant(instant) => game.start() == *instant,
        }
    }
}

impl FromStr for TimeMarker {
    type Err = ScheduleError;

    /// Parses `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` or the ISO `T`-separated
    /// instant form.
    fn from_str(s: &str) -> Result<TimeMarker, ScheduleError> {
        let s = s.trim();
        if let Ok(date) = s.parse::<NaiveDate>() {
            return Ok(TimeMarker::Date(date));
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
            if let Ok(instant) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(TimeMarker::Instant(instant));
            }
        }
        Err(ScheduleError::InvalidInput(format!(
            "{s:?} is neither a date nor an instant"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn game(d: NaiveDate, t: NaiveTime, hours: i64) -> Game {
        Game::new(d, t, Some(TimeDelta::hours(hours)), None)
    }

    #[test]
    fn game_length_round_trips_through_string_form() {
        let length = game_length_from_str("2:30:15").unwrap();
        assert_eq!(game_length_to_str(&length), "2:30:15");
        assert_eq!(game_length_from_str("2").unwrap(), TimeDelta::hours(2));
        assert_eq!(
            game_length_from_str("1:45").unwrap(),
            TimeDelta::minutes(105)
        );
    }

    #[test]
    fn game_length_rejects_malformed_strings() {
        assert!(game_length_from_str("1:2:3:4").is_err());
        assert!(game_length_from_str("ninety").is_err());
        assert!(game_length_from_str("-1:00").is_err());
    }

    #[test]
    fn weekday_parses_names_and_abbreviations() {
        assert_eq!("Tuesday".parse::<Weekday>().unwrap(), Weekday::Tuesday);
        assert_eq!("tues.".parse::<Weekday>().unwrap(), Weekday::Tuesday);
        assert_eq!("TH".parse::<Weekday>().unwrap(), Weekday::Thursday);
        assert_eq!("sun".parse::<Weekday>().unwrap(), Weekday::Sunday);
        assert!("noday".parse::<Weekday>().is_err());
    }

    #[test]
    fn next_on_or_after_lands_on_the_requested_weekday() {
        // 2024-01-01 is a Monday.
        let monday = date(2024, 1, 1);
        assert_eq!(Weekday::next_on_or_after(monday, Weekday::Monday), monday);
        assert_eq!(
            Weekday::next_on_or_after(monday, Weekday::Thursday),
            date(2024, 1, 4)
        );
        assert_eq!(
            Weekday::next_on_or_after(date(2024, 1, 2), Weekday::Monday),
            date(2024, 1, 8)
        );
    }

    #[test]
    fn sheet_parses_numbers_and_letters() {
        let kind = VenueKind::Sheet;
        assert_eq!(kind.parse("3").unwrap(), Venue::Sheet(3));
        assert_eq!(kind.parse("c").unwrap(), Venue::Sheet(3));
        assert_eq!(kind.parse("A").unwrap(), Venue::Sheet(1));
        assert!(kind.parse("sheet one").is_err());
    }

    #[test]
    fn venues_order_across_variants_by_variant_name() {
        let sheet = Venue::Sheet(4);
        let opaque = Venue::Opaque("4".to_string());
        assert_ne!(sheet, opaque);
        // "Sheet" sorts before "Venue".
        assert!(sheet < opaque);
        assert!(Venue::Sheet(1) < Venue::Sheet(2));
    }

    #[test]
    fn team_equality_ignores_member_order() {
        let a = Team::new("Stones", vec!["Lee".to_string(), "Kim".to_string()]);
        let b = Team::new("Stones", vec!["Kim".to_string(), "Lee".to_string()]);
        assert_eq!(a, b);
        let c = Team::new("Stones", vec!["Kim".to_string()]);
        assert_ne!(a, c);
        assert!(c < a);
    }

    #[test]
    fn overlap_is_symmetric_and_reflexive() {
        let a = game(date(2024, 1, 5), time(18, 0), 2);
        let b = game(date(2024, 1, 5), time(19, 0), 2);
        assert!(a.overlaps(&a));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn back_to_back_games_do_not_overlap() {
        // Half-open intervals: the second game starts exactly when the
        // first one ends.
        let first = game(date(2024, 1, 5), time(18, 0), 2);
        let second = game(date(2024, 1, 5), time(20, 0), 2);
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
    }

    #[test]
    fn equal_boundaries_count_as_overlap() {
        let a = game(date(2024, 1, 5), time(18, 0), 2);
        let same_start = game(date(2024, 1, 5), time(18, 0), 3);
        let same_end = game(date(2024, 1, 5), time(19, 0), 1);
        assert!(a.overlaps(&same_start));
        assert!(a.overlaps(&same_end));
    }

    #[test]
    fn games_without_lengths_share_an_unknown_end() {
        let a = Game::new(date(2024, 1, 5), time(18, 0), None, None);
        let b = Game::new(date(2024, 1, 6), time(20, 0), None, None);
        // Both ends are unknown, and unknown ends compare equal.
        assert!(a.overlaps(&b));
    }

    #[test]
    fn same_day_counts_spans_crossing_midnight() {
        let late = game(date(2024, 1, 5), time(23, 0), 2);
        let next_morning = game(date(2024, 1, 6), time(9, 0), 2);
        let clear = game(date(2024, 1, 7), time(9, 0), 2);
        assert!(late.same_day(&next_morning));
        assert!(!late.same_day(&clear));
    }

    #[test]
    fn game_order_sorts_missing_lengths_high() {
        let short = game(date(2024, 1, 5), time(18, 0), 1);
        let long = game(date(2024, 1, 5), time(18, 0), 3);
        let open = Game::new(date(2024, 1, 5), time(18, 0), None, None);
        let mut games = vec![open.clone(), long.clone(), short.clone()];
        games.sort();
        assert_eq!(games, vec![short, long, open]);
    }

    #[test]
    fn time_marker_matches_dates_and_instants() {
        let g = game(date(2024, 1, 5), time(18, 0), 2);
        assert!(TimeMarker::Date(date(2024, 1, 5)).matches(&g));
        assert!(!TimeMarker::Date(date(2024, 1, 6)).matches(&g));
        let instant: TimeMarker = "2024-01-05 18:00".parse().unwrap();
        assert!(instant.matches(&g));
        let other: TimeMarker = "2024-01-05 19:00".parse().unwrap();
        assert!(!other.matches(&g));
    }
}
