//! Outline task engine.
//!
//! Items live in one flat ordered sequence where each item's level encodes the tree.
//! The engine keeps the level invariant, derives numbering labels from depth and sibling
//! rank, and renders due date/time labels against a fixed reference zone. Settings and
//! change notification are explicit objects handed to callers; nothing here is global.

pub mod core {
    use chrono::{NaiveDate, NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::{fmt, str::FromStr};
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ItemId(pub Uuid);

    impl ItemId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for ItemId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for ItemId {
        type Err = uuid::Error;

        fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
            Uuid::parse_str(s.trim()).map(Self)
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// One row of the outline, in its persisted shape.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Item {
        pub id: ItemId,
        #[serde(default)]
        pub title: String,

        /// Depth in the outline, 0 = top level. Only the model moves it.
        #[serde(default)]
        pub level: usize,

        #[serde(default)]
        pub completed: bool,

        #[serde(default)]
        pub priority: Priority,

        /// Calendar day, never an instant.
        #[serde(default)]
        pub due_date: Option<NaiveDate>,

        /// Wall-clock time without a zone.
        #[serde(default)]
        pub due_time: Option<DueTime>,

        #[serde(default)]
        pub text_size: TextSize,
        #[serde(default)]
        pub is_bold: bool,
        #[serde(default)]
        pub is_italic: bool,
        #[serde(default)]
        pub is_underline: bool,

        /// Derived from `title`. Recomputed on every title change and on load.
        #[serde(default)]
        is_empty: bool,
    }

    impl Item {
        pub fn new(title: impl Into<String>, level: usize) -> Self {
            let title = title.into();
            let is_empty = title.trim().is_empty();
            Self {
                id: ItemId::new(),
                title,
                level,
                completed: false,
                priority: Priority::None,
                due_date: None,
                due_time: None,
                text_size: TextSize::default(),
                is_bold: false,
                is_italic: false,
                is_underline: false,
                is_empty,
            }
        }

        /// True iff the trimmed title is empty.
        pub fn is_empty(&self) -> bool {
            self.is_empty
        }

        pub fn refresh_empty(&mut self) {
            self.is_empty = self.title.trim().is_empty();
        }

        /// Structural copy under a fresh id.
        pub fn duplicate(&self) -> Self {
            Self {
                id: ItemId::new(),
                ..self.clone()
            }
        }

        /// Merge `patch` into the item, returning whether anything changed.
        pub fn apply_patch(&mut self, patch: ItemPatch) -> bool {
            let before = self.clone();
            let ItemPatch {
                title,
                completed,
                priority,
                due_date,
                due_time,
                text_size,
                is_bold,
                is_italic,
                is_underline,
            } = patch;

            if let Some(title) = title {
                self.title = title;
                self.refresh_empty();
            }
            if let Some(completed) = completed {
                self.completed = completed;
            }
            if let Some(priority) = priority {
                self.priority = priority;
            }
            if let Some(due_date) = due_date {
                self.due_date = due_date;
            }
            if let Some(due_time) = due_time {
                self.due_time = due_time;
            }
            if let Some(text_size) = text_size {
                self.text_size = text_size;
            }
            if let Some(is_bold) = is_bold {
                self.is_bold = is_bold;
            }
            if let Some(is_italic) = is_italic {
                self.is_italic = is_italic;
            }
            if let Some(is_underline) = is_underline {
                self.is_underline = is_underline;
            }

            *self != before
        }
    }

    /// Partial field update. `None` leaves a field alone; for the due fields
    /// `Some(None)` clears the stored value (`"dueDate": null` in JSON).
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ItemPatch {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub completed: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        pub priority: Option<Priority>,
        #[serde(
            skip_serializing_if = "Option::is_none",
            with = "::serde_with::rust::double_option"
        )]
        pub due_date: Option<Option<NaiveDate>>,
        #[serde(
            skip_serializing_if = "Option::is_none",
            with = "::serde_with::rust::double_option"
        )]
        pub due_time: Option<Option<DueTime>>,
        #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        pub text_size: Option<TextSize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub is_bold: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub is_italic: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub is_underline: Option<bool>,
    }

    impl ItemPatch {
        pub fn title(title: impl Into<String>) -> Self {
            Self {
                title: Some(title.into()),
                ..Self::default()
            }
        }

        pub fn is_noop(&self) -> bool {
            *self == Self::default()
        }
    }

    // A present field always yields `Some`, so `"priority": null` means "reset"
    // rather than "leave unchanged".
    fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        T::deserialize(deserializer).map(Some)
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Task priority. `None` encodes as `null`; unrecognised values decode to `None`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "Option<String>", into = "Option<String>")]
    pub enum Priority {
        High,
        Medium,
        Low,
        #[default]
        None,
    }

    impl Priority {
        pub fn as_str(self) -> Option<&'static str> {
            match self {
                Self::High => Some("high"),
                Self::Medium => Some("medium"),
                Self::Low => Some("low"),
                Self::None => None,
            }
        }

        pub fn parse(raw: &str) -> Self {
            match raw.trim().to_ascii_lowercase().as_str() {
                "high" => Self::High,
                "medium" => Self::Medium,
                "low" => Self::Low,
                _ => Self::None,
            }
        }
    }

    impl From<Option<String>> for Priority {
        fn from(raw: Option<String>) -> Self {
            raw.as_deref().map(Self::parse).unwrap_or_default()
        }
    }

    impl From<Priority> for Option<String> {
        fn from(priority: Priority) -> Self {
            priority.as_str().map(str::to_string)
        }
    }

    /// Text size tokens understood by the item renderer. Unknown tokens decode to
    /// the default size.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "Option<String>", into = "String")]
    pub enum TextSize {
        Small,
        #[default]
        Medium,
        Large,
        ExtraLarge,
        SuperLarge,
    }

    impl TextSize {
        pub const ALL: [TextSize; 5] = [
            TextSize::Small,
            TextSize::Medium,
            TextSize::Large,
            TextSize::ExtraLarge,
            TextSize::SuperLarge,
        ];

        pub fn token(self) -> &'static str {
            match self {
                Self::Small => "text-sm",
                Self::Medium => "text-base",
                Self::Large => "text-lg",
                Self::ExtraLarge => "text-2xl",
                Self::SuperLarge => "text-4xl",
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Self::Small => "Small",
                Self::Medium => "Medium",
                Self::Large => "Large",
                Self::ExtraLarge => "Extra Large",
                Self::SuperLarge => "Super Large",
            }
        }

        pub fn from_token(token: &str) -> Option<Self> {
            let token = token.trim();
            Self::ALL.into_iter().find(|size| size.token() == token)
        }
    }

    impl From<Option<String>> for TextSize {
        fn from(raw: Option<String>) -> Self {
            raw.as_deref()
                .and_then(Self::from_token)
                .unwrap_or_default()
        }
    }

    impl From<TextSize> for String {
        fn from(size: TextSize) -> Self {
            size.token().to_string()
        }
    }

    /// Due time with minute precision, persisted as `HH:MM`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct DueTime(NaiveTime);

    impl DueTime {
        pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
            NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
        }

        pub fn hour(self) -> u32 {
            self.0.hour()
        }

        pub fn minute(self) -> u32 {
            self.0.minute()
        }

        pub fn as_naive(self) -> NaiveTime {
            self.0
        }
    }

    impl fmt::Display for DueTime {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:02}:{:02}", self.hour(), self.minute())
        }
    }

    impl FromStr for DueTime {
        type Err = OutlineError;

        fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
            crate::parser::parse_due_time(s)
        }
    }

    impl Serialize for DueTime {
        fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for DueTime {
        fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            raw.parse().map_err(serde::de::Error::custom)
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum DateTimeField {
        Date,
        Time,
    }

    impl fmt::Display for DateTimeField {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::Date => "date",
                Self::Time => "time",
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum OutlineError {
        #[error("item {0} not found")]
        NotFound(ItemId),
        #[error("invalid due {field} `{input}`")]
        InvalidDateTime { field: DateTimeField, input: String },
    }

    pub type Result<T> = std::result::Result<T, OutlineError>;

}

pub mod parser {
    //! `nom` parsers for the persisted due date/time strings.
    //!
    //! Dates are `YYYY-MM-DD`. Times are `H:MM` or `HH:MM`, optionally followed by
    //! `:SS` as HTML time inputs sometimes emit; seconds are validated and dropped.
    //! Anything else is an `InvalidDateTime` error.

    use crate::core::{DateTimeField, DueTime, OutlineError, Result};
    use chrono::NaiveDate;
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, map_res, opt},
        sequence::{preceded, tuple},
    };

    type PResult<'a, T> = IResult<&'a str, T>;

    pub fn parse_due_date(input: &str) -> Result<NaiveDate> {
        all_consuming(date)(input.trim())
            .map(|(_, date)| date)
            .map_err(|_| invalid(DateTimeField::Date, input))
    }

    pub fn parse_due_time(input: &str) -> Result<DueTime> {
        all_consuming(time)(input.trim())
            .map(|(_, time)| time)
            .map_err(|_| invalid(DateTimeField::Time, input))
    }

    /// Like `parse_due_date`, with missing and blank input meaning "no date".
    pub fn parse_optional_date(input: Option<&str>) -> Result<Option<NaiveDate>> {
        match input.map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_due_date(raw).map(Some),
        }
    }

    /// Like `parse_due_time`, with missing and blank input meaning "no time".
    pub fn parse_optional_time(input: Option<&str>) -> Result<Option<DueTime>> {
        match input.map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_due_time(raw).map(Some),
        }
    }

    fn invalid(field: DateTimeField, input: &str) -> OutlineError {
        OutlineError::InvalidDateTime {
            field,
            input: input.to_string(),
        }
    }

    fn date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((digits(4, 4), char('-'), digits(2, 2), char('-'), digits(2, 2))),
            |(y, _, m, _, d)| {
                i32::try_from(y)
                    .ok()
                    .and_then(|y| NaiveDate::from_ymd_opt(y, m, d))
                    .ok_or("invalid date")
            },
        )(i)
    }

    fn time(i: &str) -> PResult<'_, DueTime> {
        map_res(
            tuple((
                digits(1, 2),
                char(':'),
                digits(2, 2),
                opt(preceded(char(':'), digits(2, 2))),
            )),
            |(h, _, m, s)| {
                let parsed = match s {
                    Some(s) if s > 59 => None,
                    _ => DueTime::from_hm(h, m),
                };
                parsed.ok_or("invalid time")
            },
        )(i)
    }

    fn digits<'a>(min: usize, max: usize) -> impl FnMut(&'a str) -> PResult<'a, u32> {
        map_res(
            take_while_m_n(min, max, |c: char| c.is_ascii_digit()),
            |s: &str| s.parse::<u32>(),
        )
    }

}

pub mod numbering {
    //! Depth-based outline numbering.
    //!
    //! | level | style   | labels               |
    //! |-------|---------|----------------------|
    //! | 0     | arabic  | `1. ` `2. ` `3. `    |
    //! | 1     | letters | `a. ` `b. ` `c. `    |
    //! | 2     | roman   | `i. ` `ii. ` `iii. ` |
    //! | 3+    | bullet  | `• `                 |

    const ROMAN: [&str; 10] = ["i", "ii", "iii", "iv", "v", "vi", "vii", "viii", "ix", "x"];

    pub const BULLET: char = '•';

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum NumberingStyle {
        Arabic,
        Letter,
        Roman,
        Bullet,
    }

    impl NumberingStyle {
        pub fn for_level(level: usize) -> Self {
            match level {
                0 => Self::Arabic,
                1 => Self::Letter,
                2 => Self::Roman,
                _ => Self::Bullet,
            }
        }

        /// Marker text without trailing punctuation.
        pub fn marker(self, sibling_index: usize) -> String {
            match self {
                Self::Arabic => sibling_index.saturating_add(1).to_string(),
                Self::Letter => letter(sibling_index).to_string(),
                // Roman numerals stop at x; later siblings all read "x".
                Self::Roman => ROMAN
                    .get(sibling_index)
                    .unwrap_or(&ROMAN[ROMAN.len() - 1])
                    .to_string(),
                Self::Bullet => BULLET.to_string(),
            }
        }
    }

    /// Label for the item at `level` ranked `sibling_index` among its siblings.
    /// Empty when numbering is disabled.
    pub fn numbering_label(level: usize, sibling_index: usize, enabled: bool) -> String {
        if !enabled {
            return String::new();
        }
        let style = NumberingStyle::for_level(level);
        let marker = style.marker(sibling_index);
        match style {
            NumberingStyle::Bullet => format!("{marker} "),
            _ => format!("{marker}. "),
        }
    }

    // Past `z` the code point keeps counting: `{`, `|`, `}`, ...
    fn letter(index: usize) -> char {
        u32::try_from(index)
            .ok()
            .and_then(|i| ('a' as u32).checked_add(i))
            .and_then(char::from_u32)
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

}

pub mod datetime {
    //! Due date/time labels.
    //!
    //! Dates render in the fixed reference zone so a due date reads the same for every
    //! viewer. A stored due date is a calendar day in that zone, not an instant, so it
    //! renders as-is and can never roll over to a neighbouring day.

    use crate::core::{DueTime, Result};
    use crate::parser::{parse_optional_date, parse_optional_time};
    use crate::settings::SettingsSnapshot;
    use chrono::{Datelike, NaiveDate};

    pub const REFERENCE_ZONE: &str = "America/New_York";

    /// The date components a label should include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DateDisplay {
        pub show_day_of_week: bool,
        pub show_year: bool,
    }

    impl From<&SettingsSnapshot> for DateDisplay {
        fn from(settings: &SettingsSnapshot) -> Self {
            Self {
                show_day_of_week: settings.show_day_of_week,
                show_year: settings.show_year,
            }
        }
    }

    /// `"<date> at <time>"`, either part alone, or `None` when both are absent.
    pub fn format_due(
        date: Option<NaiveDate>,
        time: Option<DueTime>,
        display: DateDisplay,
    ) -> Option<String> {
        if date.is_none() && time.is_none() {
            return None;
        }
        let mut parts = Vec::with_capacity(2);
        if let Some(date) = date {
            parts.push(format_date_part(date, display));
        }
        if let Some(time) = time {
            parts.push(format_time_part(time));
        }
        Some(parts.join(" at "))
    }

    /// Same as `format_due` for raw persisted strings. Blank strings count as absent.
    pub fn format_due_strings(
        date: Option<&str>,
        time: Option<&str>,
        display: DateDisplay,
    ) -> Result<Option<String>> {
        let date = parse_optional_date(date)?;
        let time = parse_optional_time(time)?;
        Ok(format_due(date, time, display))
    }

    /// `[Weekday, ]Mon D[, YYYY]`
    pub fn format_date_part(date: NaiveDate, display: DateDisplay) -> String {
        let mut components = Vec::with_capacity(3);
        if display.show_day_of_week {
            components.push(date.format("%A").to_string());
        }
        components.push(short_date_label(date));
        if display.show_year {
            components.push(format!("{:04}", date.year()));
        }
        components.join(", ")
    }

    /// `Mon D`, as shown next to the due-date menu entry.
    pub fn short_date_label(date: NaiveDate) -> String {
        format!("{} {}", date.format("%b"), date.day())
    }

    /// 12-hour clock; hour 0 reads as 12.
    pub fn format_time_part(time: DueTime) -> String {
        let period = if time.hour() >= 12 { "PM" } else { "AM" };
        let hour = match time.hour() % 12 {
            0 => 12,
            h => h,
        };
        format!("{hour}:{:02} {period}", time.minute())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{DateTimeField, OutlineError};

        fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
            NaiveDate::from_ymd_opt(y, m, d)
        }

        const DOW: DateDisplay = DateDisplay {
            show_day_of_week: true,
            show_year: false,
        };

        #[test]
        fn date_with_day_of_week() {
            assert_eq!(
                format_due(date(2024, 3, 5), None, DOW).as_deref(),
                Some("Tuesday, Mar 5")
            );
        }

        #[test]
        fn date_components_follow_flags() {
            let d = date(2024, 3, 5);
            assert_eq!(
                format_due(d, None, DateDisplay::default()).as_deref(),
                Some("Mar 5")
            );
            let year = DateDisplay {
                show_day_of_week: false,
                show_year: true,
            };
            assert_eq!(format_due(d, None, year).as_deref(), Some("Mar 5, 2024"));
            let both = DateDisplay {
                show_day_of_week: true,
                show_year: true,
            };
            assert_eq!(
                format_due(d, None, both).as_deref(),
                Some("Tuesday, Mar 5, 2024")
            );
        }

        #[test]
        fn times_use_twelve_hour_clock() {
            let label = |h, m| format_due(None, DueTime::from_hm(h, m), DOW);
            assert_eq!(label(13, 5).as_deref(), Some("1:05 PM"));
            assert_eq!(label(0, 30).as_deref(), Some("12:30 AM"));
            assert_eq!(label(12, 0).as_deref(), Some("12:00 PM"));
            assert_eq!(label(9, 45).as_deref(), Some("9:45 AM"));
            assert_eq!(label(23, 59).as_deref(), Some("11:59 PM"));
        }

        #[test]
        fn date_and_time_are_joined() {
            assert_eq!(
                format_due(date(2025, 1, 1), DueTime::from_hm(8, 0), DateDisplay::default())
                    .as_deref(),
                Some("Jan 1 at 8:00 AM")
            );
        }

        #[test]
        fn nothing_to_show() {
            assert_eq!(format_due(None, None, DOW), None);
            assert_eq!(format_due_strings(None, Some(""), DOW).unwrap(), None);
        }

        #[test]
        fn string_boundary() {
            assert_eq!(
                format_due_strings(Some("2024-03-05"), None, DOW)
                    .unwrap()
                    .as_deref(),
                Some("Tuesday, Mar 5")
            );
            assert_eq!(
                format_due_strings(None, Some("13:05"), DOW)
                    .unwrap()
                    .as_deref(),
                Some("1:05 PM")
            );
            assert_eq!(
                format_due_strings(None, Some("00:30"), DOW)
                    .unwrap()
                    .as_deref(),
                Some("12:30 AM")
            );
        }

        #[test]
        fn malformed_strings_are_errors() {
            assert!(matches!(
                format_due_strings(Some("2024-02-31"), None, DOW),
                Err(OutlineError::InvalidDateTime {
                    field: DateTimeField::Date,
                    ..
                })
            ));
            assert!(matches!(
                format_due_strings(Some("2024-02-01"), Some("7pm"), DOW),
                Err(OutlineError::InvalidDateTime {
                    field: DateTimeField::Time,
                    ..
                })
            ));
        }

        #[test]
        fn short_labels() {
            assert_eq!(short_date_label(date(2024, 11, 28).unwrap()), "Nov 28");
        }
    }
}

pub mod notify {
    //! Listener registry behind the settings store and the outline model.
    //! Listeners run synchronously, in subscription order, on the mutating thread.

    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SubscriptionId(u64);

    type Listener<E> = Box<dyn FnMut(&E)>;

    pub struct Subscribers<E> {
        next_id: u64,
        listeners: Vec<(SubscriptionId, Listener<E>)>,
    }

    impl<E> Default for Subscribers<E> {
        fn default() -> Self {
            Self {
                next_id: 0,
                listeners: Vec::new(),
            }
        }
    }

    impl<E> fmt::Debug for Subscribers<E> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Subscribers")
                .field("listeners", &self.listeners.len())
                .finish()
        }
    }

    impl<E> Subscribers<E> {
        pub fn subscribe(&mut self, listener: impl FnMut(&E) + 'static) -> SubscriptionId {
            let id = SubscriptionId(self.next_id);
            self.next_id += 1;
            self.listeners.push((id, Box::new(listener)));
            id
        }

        /// Returns false if `id` was not subscribed.
        pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
            let before = self.listeners.len();
            self.listeners.retain(|(existing, _)| *existing != id);
            self.listeners.len() != before
        }

        pub fn notify(&mut self, event: &E) {
            for (_, listener) in &mut self.listeners {
                listener(event);
            }
        }

        pub fn len(&self) -> usize {
            self.listeners.len()
        }

        pub fn is_empty(&self) -> bool {
            self.listeners.is_empty()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::{cell::RefCell, rc::Rc};

        #[test]
        fn notifies_in_order_until_unsubscribed() {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let mut subs = Subscribers::<u32>::default();

            let first = {
                let seen = Rc::clone(&seen);
                subs.subscribe(move |n| seen.borrow_mut().push(("first", *n)))
            };
            {
                let seen = Rc::clone(&seen);
                subs.subscribe(move |n| seen.borrow_mut().push(("second", *n)));
            }

            subs.notify(&1);
            assert!(subs.unsubscribe(first));
            assert!(!subs.unsubscribe(first));
            subs.notify(&2);

            assert_eq!(
                *seen.borrow(),
                vec![("first", 1), ("second", 1), ("second", 2)]
            );
            assert_eq!(subs.len(), 1);
        }
    }
}

pub mod settings {
    //! Display preferences and the store that owns them.
    //!
    //! Renderers receive the store explicitly and read `SettingsSnapshot` values from
    //! it; the formatters only ever see a snapshot. Setters that leave the value
    //! unchanged do not notify.

    use crate::notify::{Subscribers, SubscriptionId};
    use log::debug;
    use serde::{Deserialize, Serialize};

    /// Zoom levels offered by the settings menu. Unknown factors decode to 100%.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "f64", into = "f64")]
    pub enum Zoom {
        #[default]
        Percent100,
        Percent125,
        Percent150,
        Percent200,
    }

    impl Zoom {
        pub const ALL: [Zoom; 4] = [
            Zoom::Percent100,
            Zoom::Percent125,
            Zoom::Percent150,
            Zoom::Percent200,
        ];

        pub fn factor(self) -> f64 {
            match self {
                Self::Percent100 => 1.0,
                Self::Percent125 => 1.25,
                Self::Percent150 => 1.5,
                Self::Percent200 => 2.0,
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Self::Percent100 => "100%",
                Self::Percent125 => "125%",
                Self::Percent150 => "150%",
                Self::Percent200 => "200%",
            }
        }

        pub fn from_factor(factor: f64) -> Option<Self> {
            Self::ALL
                .into_iter()
                .find(|zoom| (zoom.factor() - factor).abs() < f64::EPSILON)
        }
    }

    impl From<f64> for Zoom {
        fn from(factor: f64) -> Self {
            Self::from_factor(factor).unwrap_or_default()
        }
    }

    impl From<Zoom> for f64 {
        fn from(zoom: Zoom) -> Self {
            zoom.factor()
        }
    }

    /// Immutable view of the display preferences at formatting time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct SettingsSnapshot {
        pub is_dark: bool,
        pub show_numbering: bool,
        pub zoom: Zoom,
        pub show_day_of_week: bool,
        pub show_year: bool,
    }

    impl Default for SettingsSnapshot {
        fn default() -> Self {
            Self {
                is_dark: false,
                show_numbering: true,
                zoom: Zoom::default(),
                show_day_of_week: false,
                show_year: false,
            }
        }
    }

    #[derive(Debug, Default)]
    pub struct SettingsStore {
        current: SettingsSnapshot,
        subscribers: Subscribers<SettingsSnapshot>,
    }

    impl SettingsStore {
        pub fn new(initial: SettingsSnapshot) -> Self {
            Self {
                current: initial,
                subscribers: Subscribers::default(),
            }
        }

        pub fn snapshot(&self) -> SettingsSnapshot {
            self.current
        }

        pub fn is_dark(&self) -> bool {
            self.current.is_dark
        }

        pub fn show_numbering(&self) -> bool {
            self.current.show_numbering
        }

        pub fn zoom(&self) -> Zoom {
            self.current.zoom
        }

        pub fn show_day_of_week(&self) -> bool {
            self.current.show_day_of_week
        }

        pub fn show_year(&self) -> bool {
            self.current.show_year
        }

        pub fn set_dark(&mut self, value: bool) -> bool {
            self.update(|s| s.is_dark = value)
        }

        pub fn set_show_numbering(&mut self, value: bool) -> bool {
            self.update(|s| s.show_numbering = value)
        }

        pub fn set_zoom(&mut self, value: Zoom) -> bool {
            self.update(|s| s.zoom = value)
        }

        pub fn set_show_day_of_week(&mut self, value: bool) -> bool {
            self.update(|s| s.show_day_of_week = value)
        }

        pub fn set_show_year(&mut self, value: bool) -> bool {
            self.update(|s| s.show_year = value)
        }

        /// Swap in a whole snapshot, e.g. one loaded from a config file.
        pub fn replace(&mut self, snapshot: SettingsSnapshot) -> bool {
            self.update(|s| *s = snapshot)
        }

        pub fn subscribe(
            &mut self,
            listener: impl FnMut(&SettingsSnapshot) + 'static,
        ) -> SubscriptionId {
            self.subscribers.subscribe(listener)
        }

        pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
            self.subscribers.unsubscribe(id)
        }

        fn update(&mut self, change: impl FnOnce(&mut SettingsSnapshot)) -> bool {
            let mut next = self.current;
            change(&mut next);
            if next == self.current {
                return false;
            }
            debug!("event=settings_changed before={:?} after={:?}", self.current, next);
            self.current = next;
            self.subscribers.notify(&next);
            true
        }
    }

}

pub mod model {
    //! The outline aggregate.
    //!
    //! Items sit in one ordered map: map order is outline order, and the id index gives
    //! constant-time lookups. Level plus position encodes the tree; an item at level L
    //! belongs to the nearest preceding item at level L - 1.
    //!
    //! # Invariants
    //! - The first item is level 0.
    //! - No item is more than one level deeper than its predecessor.
    //! - Both are re-established by `normalize_levels` after every mutation.
    //! - Mutations never reorder unrelated items.

    use crate::core::{Item, ItemId, ItemPatch, OutlineError, Result};
    use crate::notify::{Subscribers, SubscriptionId};
    use indexmap::IndexMap;
    use log::{debug, warn};
    use serde::{Deserialize, Serialize};
    use std::ops::Range;

    /// What happens to the descendants of a deleted item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DeleteMode {
        /// Remove the whole subtree.
        Cascade,
        /// Remove the item only; each descendant moves up one level.
        #[default]
        Reparent,
    }

    /// Emitted to subscribers after every mutation that changed something.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum OutlineChange {
        Inserted {
            id: ItemId,
            index: usize,
        },
        Updated {
            id: ItemId,
        },
        Relevelled {
            ids: Vec<ItemId>,
        },
        Deleted {
            removed: Vec<ItemId>,
            relevelled: Vec<ItemId>,
        },
    }

    #[derive(Debug, Default)]
    pub struct OutlineModel {
        items: IndexMap<ItemId, Item>,
        delete_mode: DeleteMode,
        subscribers: Subscribers<OutlineChange>,
    }

    impl OutlineModel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Build a model from persisted items. `isEmpty` is recomputed and any level
        /// that breaks the invariant is clamped (and logged).
        pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
            let mut model = Self::new();
            for mut item in items {
                item.refresh_empty();
                if let Some(previous) = model.items.insert(item.id, item) {
                    warn!("event=duplicate_id item={} action=kept_last", previous.id);
                }
            }
            model.repair_levels();
            model
        }

        pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
            self.delete_mode = mode;
            self
        }

        pub fn delete_mode(&self) -> DeleteMode {
            self.delete_mode
        }

        pub fn set_delete_mode(&mut self, mode: DeleteMode) {
            self.delete_mode = mode;
        }

        /* ------------------------------ Reads ------------------------------ */

        pub fn items(&self) -> impl Iterator<Item = &Item> {
            self.items.values()
        }

        pub fn to_items(&self) -> Vec<Item> {
            self.items.values().cloned().collect()
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }

        pub fn get(&self, id: ItemId) -> Option<&Item> {
            self.items.get(&id)
        }

        pub fn get_index(&self, index: usize) -> Option<&Item> {
            self.items.get_index(index).map(|(_, item)| item)
        }

        pub fn position(&self, id: ItemId) -> Option<usize> {
            self.items.get_index_of(&id)
        }

        /// Nearest preceding item one level up, or `None` for top-level items.
        pub fn parent(&self, id: ItemId) -> Result<Option<ItemId>> {
            let index = self.index_of(id)?;
            let level = self.items[index].level;
            Ok(self
                .items
                .values()
                .take(index)
                .rev()
                .find(|item| item.level < level)
                .map(|item| item.id))
        }

        /// 0-based rank of the item among siblings under the same parent.
        pub fn sibling_index(&self, id: ItemId) -> Result<usize> {
            let index = self.index_of(id)?;
            let level = self.items[index].level;
            let rank = self
                .items
                .values()
                .take(index)
                .rev()
                .take_while(|item| item.level >= level)
                .filter(|item| item.level == level)
                .count();
            Ok(rank)
        }

        /// Sibling rank of every item, in outline order.
        pub fn sibling_indices(&self) -> Vec<usize> {
            let mut counters: Vec<usize> = Vec::new();
            self.items
                .values()
                .map(|item| {
                    counters.truncate(item.level + 1);
                    counters.resize(item.level + 1, 0);
                    let rank = counters[item.level];
                    counters[item.level] += 1;
                    rank
                })
                .collect()
        }

        /// Number of items strictly below `id` in its subtree.
        pub fn descendant_count(&self, id: ItemId) -> Result<usize> {
            let index = self.index_of(id)?;
            Ok(self.subtree_end(index) - index - 1)
        }

        /* ---------------------------- Mutations ---------------------------- */

        /// One level deeper, never more than one below the item above. Descendants
        /// move along. Returns false when nothing changed.
        pub fn indent(&mut self, id: ItemId) -> Result<bool> {
            let index = self.index_of(id)?;
            let level = self.items[index].level;
            if level >= self.max_level_at(index) {
                debug!("event=indent item={id} status=noop level={level}");
                return Ok(false);
            }
            let end = self.subtree_end(index);
            let ids = self.shift_levels(index..end, true);
            debug!(
                "event=indent item={id} from={level} to={} moved={}",
                level + 1,
                ids.len()
            );
            self.commit(OutlineChange::Relevelled { ids });
            Ok(true)
        }

        /// One level shallower, floored at 0. Descendants move along.
        pub fn outdent(&mut self, id: ItemId) -> Result<bool> {
            let index = self.index_of(id)?;
            let level = self.items[index].level;
            if level == 0 {
                debug!("event=outdent item={id} status=noop level=0");
                return Ok(false);
            }
            let end = self.subtree_end(index);
            let ids = self.shift_levels(index..end, false);
            debug!(
                "event=outdent item={id} from={level} to={} moved={}",
                level - 1,
                ids.len()
            );
            self.commit(OutlineChange::Relevelled { ids });
            Ok(true)
        }

        /// New empty item right after `id`, at the same level.
        pub fn insert_after(&mut self, id: ItemId) -> Result<ItemId> {
            self.insert_after_with(id, "")
        }

        pub fn insert_after_with(&mut self, id: ItemId, title: impl Into<String>) -> Result<ItemId> {
            let index = self.index_of(id)?;
            let item = Item::new(title, self.items[index].level);
            Ok(self.insert_at(index + 1, item))
        }

        /// Add `item` at the end. Its level is clamped to what the last item allows.
        pub fn append(&mut self, mut item: Item) -> ItemId {
            let index = self.items.len();
            item.level = item.level.min(self.max_level_at(index));
            item.refresh_empty();
            self.insert_at(index, item)
        }

        /// Copy of `id` under a fresh id, right after the source, same level.
        pub fn duplicate(&mut self, id: ItemId) -> Result<ItemId> {
            let index = self.index_of(id)?;
            let copy = self.items[index].duplicate();
            Ok(self.insert_at(index + 1, copy))
        }

        /// Delete with the model's default `DeleteMode`.
        pub fn delete(&mut self, id: ItemId) -> Result<Vec<ItemId>> {
            self.delete_with(id, self.delete_mode)
        }

        /// Remove `id`, applying `mode` to its descendants. Returns the removed ids.
        pub fn delete_with(&mut self, id: ItemId, mode: DeleteMode) -> Result<Vec<ItemId>> {
            let index = self.index_of(id)?;
            let end = self.subtree_end(index);
            let (removed, relevelled) = match mode {
                DeleteMode::Cascade => {
                    let removed = self.items.drain(index..end).map(|(id, _)| id).collect();
                    (removed, Vec::new())
                }
                DeleteMode::Reparent => {
                    let relevelled = self.shift_levels(index + 1..end, false);
                    self.items.shift_remove_index(index);
                    (vec![id], relevelled)
                }
            };
            debug!(
                "event=delete item={id} mode={mode:?} removed={} relevelled={}",
                removed.len(),
                relevelled.len()
            );
            self.commit(OutlineChange::Deleted {
                removed: removed.clone(),
                relevelled,
            });
            Ok(removed)
        }

        /// Merge `patch` into `id`. Returns whether anything changed.
        pub fn update(&mut self, id: ItemId, patch: ItemPatch) -> Result<bool> {
            let item = self.items.get_mut(&id).ok_or(OutlineError::NotFound(id))?;
            if !item.apply_patch(patch) {
                return Ok(false);
            }
            debug!("event=update item={id} empty={}", item.is_empty());
            self.commit(OutlineChange::Updated { id });
            Ok(true)
        }

        pub fn subscribe(
            &mut self,
            listener: impl FnMut(&OutlineChange) + 'static,
        ) -> SubscriptionId {
            self.subscribers.subscribe(listener)
        }

        pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
            self.subscribers.unsubscribe(id)
        }

        /* ---------------------------- Internals ---------------------------- */

        fn index_of(&self, id: ItemId) -> Result<usize> {
            self.items
                .get_index_of(&id)
                .ok_or(OutlineError::NotFound(id))
        }

        fn max_level_at(&self, index: usize) -> usize {
            match index {
                0 => 0,
                _ => self.items[index - 1].level + 1,
            }
        }

        // Exclusive end of the subtree rooted at `index`.
        fn subtree_end(&self, index: usize) -> usize {
            let level = self.items[index].level;
            let mut end = index + 1;
            while end < self.items.len() && self.items[end].level > level {
                end += 1;
            }
            end
        }

        fn shift_levels(&mut self, range: Range<usize>, deeper: bool) -> Vec<ItemId> {
            let mut ids = Vec::with_capacity(range.len());
            for index in range {
                if let Some((id, item)) = self.items.get_index_mut(index) {
                    item.level = if deeper {
                        item.level + 1
                    } else {
                        item.level.saturating_sub(1)
                    };
                    ids.push(*id);
                }
            }
            ids
        }

        fn insert_at(&mut self, index: usize, item: Item) -> ItemId {
            let id = item.id;
            self.items.shift_insert(index, id, item);
            debug!("event=insert item={id} index={index}");
            self.commit(OutlineChange::Inserted { id, index });
            id
        }

        fn commit(&mut self, change: OutlineChange) {
            self.repair_levels();
            self.subscribers.notify(&change);
        }

        fn repair_levels(&mut self) {
            for (id, from, to) in self.normalize_levels() {
                warn!("event=level_repaired item={id} from={from} to={to}");
            }
        }

        // The one place the level invariant is enforced.
        fn normalize_levels(&mut self) -> Vec<(ItemId, usize, usize)> {
            let mut repaired = Vec::new();
            let mut ceiling = 0;
            for (id, item) in self.items.iter_mut() {
                if item.level > ceiling {
                    repaired.push((*id, item.level, ceiling));
                    item.level = ceiling;
                }
                ceiling = item.level + 1;
            }
            repaired
        }
    }

}

pub mod commands {
    //! The mutation surface the UI layer talks to.
    //!
    //! `OutlineCallbacks` mirrors the per-item callbacks of the item view. Hosts that can
    //! issue mutations from several threads send `OutlineCommand` values to the thread
    //! owning the model and feed them through `OutlineModel::apply` one at a time.

    use crate::core::{ItemId, ItemPatch, OutlineError, Result};
    use crate::model::OutlineModel;
    use log::debug;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Key {
        Tab,
        Enter,
        Backspace,
        Other,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct KeyEvent {
        pub key: Key,
        #[serde(default)]
        pub shift: bool,
    }

    impl KeyEvent {
        pub fn new(key: Key) -> Self {
            Self { key, shift: false }
        }

        pub fn shifted(key: Key) -> Self {
            Self { key, shift: true }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum KeyOutcome {
        /// The key was consumed; the UI should focus `focus` if set.
        Handled { focus: Option<ItemId> },
        /// Leave the key to the default text-input behaviour.
        Ignored,
    }

    pub trait OutlineCallbacks {
        fn on_update(&mut self, id: ItemId, patch: ItemPatch) -> Result<bool>;
        fn on_delete(&mut self, id: ItemId) -> Result<Vec<ItemId>>;
        fn on_duplicate(&mut self, id: ItemId) -> Result<ItemId>;
        fn on_indent(&mut self, id: ItemId) -> Result<bool>;
        fn on_outdent(&mut self, id: ItemId) -> Result<bool>;
        fn on_key_down(&mut self, event: KeyEvent, id: ItemId) -> Result<KeyOutcome>;
    }

    impl OutlineCallbacks for OutlineModel {
        fn on_update(&mut self, id: ItemId, patch: ItemPatch) -> Result<bool> {
            self.update(id, patch)
        }

        fn on_delete(&mut self, id: ItemId) -> Result<Vec<ItemId>> {
            self.delete(id)
        }

        fn on_duplicate(&mut self, id: ItemId) -> Result<ItemId> {
            self.duplicate(id)
        }

        fn on_indent(&mut self, id: ItemId) -> Result<bool> {
            self.indent(id)
        }

        fn on_outdent(&mut self, id: ItemId) -> Result<bool> {
            self.outdent(id)
        }

        // Tab / Shift+Tab re-level, Enter opens a sibling below, Backspace removes an
        // empty row unless it is the last one left.
        fn on_key_down(&mut self, event: KeyEvent, id: ItemId) -> Result<KeyOutcome> {
            let index = self.position(id).ok_or(OutlineError::NotFound(id))?;
            debug!("event=key_down item={id} key={:?} shift={}", event.key, event.shift);
            match (event.key, event.shift) {
                (Key::Tab, false) => {
                    self.indent(id)?;
                    Ok(KeyOutcome::Handled { focus: Some(id) })
                }
                (Key::Tab, true) => {
                    self.outdent(id)?;
                    Ok(KeyOutcome::Handled { focus: Some(id) })
                }
                (Key::Enter, false) => {
                    let created = self.insert_after(id)?;
                    Ok(KeyOutcome::Handled {
                        focus: Some(created),
                    })
                }
                (Key::Backspace, _) => {
                    let is_empty = self.get(id).is_some_and(|item| item.is_empty());
                    if !is_empty || self.len() == 1 {
                        return Ok(KeyOutcome::Ignored);
                    }
                    self.delete(id)?;
                    let focus = match index {
                        0 => self.get_index(0),
                        _ => self.get_index(index - 1),
                    }
                    .map(|item| item.id);
                    Ok(KeyOutcome::Handled { focus })
                }
                _ => Ok(KeyOutcome::Ignored),
            }
        }
    }

    /// A mutation request, in the shape the UI callbacks take.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "op", rename_all = "camelCase")]
    pub enum OutlineCommand {
        Update { id: ItemId, patch: ItemPatch },
        Delete { id: ItemId },
        Duplicate { id: ItemId },
        Indent { id: ItemId },
        Outdent { id: ItemId },
        InsertAfter { id: ItemId },
        KeyDown { id: ItemId, event: KeyEvent },
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CommandOutcome {
        Changed(bool),
        Created(ItemId),
        Removed(Vec<ItemId>),
        Key(KeyOutcome),
    }

    impl OutlineModel {
        pub fn apply(&mut self, command: OutlineCommand) -> Result<CommandOutcome> {
            match command {
                OutlineCommand::Update { id, patch } => {
                    self.on_update(id, patch).map(CommandOutcome::Changed)
                }
                OutlineCommand::Delete { id } => self.on_delete(id).map(CommandOutcome::Removed),
                OutlineCommand::Duplicate { id } => {
                    self.on_duplicate(id).map(CommandOutcome::Created)
                }
                OutlineCommand::Indent { id } => self.on_indent(id).map(CommandOutcome::Changed),
                OutlineCommand::Outdent { id } => self.on_outdent(id).map(CommandOutcome::Changed),
                OutlineCommand::InsertAfter { id } => {
                    self.insert_after(id).map(CommandOutcome::Created)
                }
                OutlineCommand::KeyDown { id, event } => {
                    self.on_key_down(event, id).map(CommandOutcome::Key)
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::Item;
        use std::{sync::mpsc, thread};

        fn model(levels: &[usize]) -> (OutlineModel, Vec<ItemId>) {
            let items: Vec<Item> = levels
                .iter()
                .map(|level| Item::new(format!("L{level}"), *level))
                .collect();
            let ids = items.iter().map(|item| item.id).collect();
            (OutlineModel::from_items(items), ids)
        }

        #[test]
        fn tab_and_shift_tab() {
            let (mut m, ids) = model(&[0, 0]);
            let out = m.on_key_down(KeyEvent::new(Key::Tab), ids[1]).unwrap();
            assert_eq!(out, KeyOutcome::Handled { focus: Some(ids[1]) });
            assert_eq!(m.get(ids[1]).unwrap().level, 1);

            m.on_key_down(KeyEvent::shifted(Key::Tab), ids[1]).unwrap();
            assert_eq!(m.get(ids[1]).unwrap().level, 0);
        }

        #[test]
        fn enter_opens_sibling_and_focuses_it() {
            let (mut m, ids) = model(&[0, 1]);
            let out = m.on_key_down(KeyEvent::new(Key::Enter), ids[1]).unwrap();
            let KeyOutcome::Handled { focus: Some(created) } = out else {
                panic!("expected focus on the new item, got {out:?}");
            };
            assert_eq!(m.position(created), Some(2));
            assert_eq!(m.get(created).unwrap().level, 1);
        }

        #[test]
        fn backspace_removes_only_empty_rows() {
            let (mut m, ids) = model(&[0, 0]);
            assert_eq!(
                m.on_key_down(KeyEvent::new(Key::Backspace), ids[1]).unwrap(),
                KeyOutcome::Ignored
            );

            m.on_update(ids[1], ItemPatch::title("")).unwrap();
            assert_eq!(
                m.on_key_down(KeyEvent::new(Key::Backspace), ids[1]).unwrap(),
                KeyOutcome::Handled { focus: Some(ids[0]) }
            );
            assert_eq!(m.len(), 1);

            m.on_update(ids[0], ItemPatch::title(" ")).unwrap();
            assert_eq!(
                m.on_key_down(KeyEvent::new(Key::Backspace), ids[0]).unwrap(),
                KeyOutcome::Ignored
            );
            assert_eq!(m.len(), 1);
        }

        #[test]
        fn other_keys_are_ignored() {
            let (mut m, ids) = model(&[0]);
            assert_eq!(
                m.on_key_down(KeyEvent::new(Key::Other), ids[0]).unwrap(),
                KeyOutcome::Ignored
            );
            assert!(matches!(
                m.on_key_down(KeyEvent::new(Key::Other), ItemId::new()),
                Err(OutlineError::NotFound(_))
            ));
        }

        #[test]
        fn commands_decode_from_json() {
            let raw = r#"{"op": "update", "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
                          "patch": {"title": "renamed", "dueTime": "07:15"}}"#;
            let command: OutlineCommand = serde_json::from_str(raw).expect("decode command");
            let OutlineCommand::Update { patch, .. } = command else {
                panic!("expected update");
            };
            assert_eq!(patch.title.as_deref(), Some("renamed"));
            assert_eq!(patch.due_time.flatten().map(|t| t.to_string()).as_deref(), Some("07:15"));

            let key: OutlineCommand = serde_json::from_str(
                r#"{"op": "keyDown", "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
                    "event": {"key": "tab", "shift": true}}"#,
            )
            .expect("decode key command");
            assert!(matches!(
                key,
                OutlineCommand::KeyDown {
                    event: KeyEvent {
                        key: Key::Tab,
                        shift: true
                    },
                    ..
                }
            ));
        }

        #[test]
        fn commands_from_many_threads_apply_in_arrival_order() {
            let (mut m, ids) = model(&[0, 0, 0, 0]);
            let (tx, rx) = mpsc::channel::<OutlineCommand>();

            let handles: Vec<_> = ids[1..]
                .iter()
                .copied()
                .map(|id| {
                    let tx = tx.clone();
                    thread::spawn(move || {
                        for _ in 0..3 {
                            tx.send(OutlineCommand::Indent { id }).expect("send");
                        }
                        tx.send(OutlineCommand::Outdent { id }).expect("send");
                    })
                })
                .collect();
            drop(tx);
            for handle in handles {
                handle.join().expect("sender thread");
            }

            for command in rx {
                m.apply(command).expect("apply");
                let mut ceiling = 0;
                for item in m.items() {
                    assert!(item.level <= ceiling);
                    ceiling = item.level + 1;
                }
            }
            assert_eq!(m.len(), 4);
        }

        #[test]
        fn apply_reports_outcomes() {
            let (mut m, ids) = model(&[0]);
            let CommandOutcome::Created(copy) = m.apply(OutlineCommand::Duplicate { id: ids[0] }).unwrap()
            else {
                panic!("expected a created id");
            };
            assert_eq!(
                m.apply(OutlineCommand::Indent { id: copy }).unwrap(),
                CommandOutcome::Changed(true)
            );
            assert_eq!(
                m.apply(OutlineCommand::Delete { id: ids[0] }).unwrap(),
                CommandOutcome::Removed(vec![ids[0]])
            );
            assert_eq!(m.get(copy).unwrap().level, 0);
        }
    }
}

pub mod projectors {
    pub mod row_projector {
        //! Display rows: everything the item view needs, derived from the model and one
        //! settings snapshot. Recomputed on every render pass.

        use crate::core::{Item, ItemId, Priority, TextSize};
        use crate::datetime::{DateDisplay, format_due};
        use crate::model::OutlineModel;
        use crate::numbering::numbering_label;
        use crate::settings::SettingsSnapshot;
        use serde::Serialize;

        /// Horizontal offset per outline level, in CSS pixels.
        pub const INDENT_STEP_PX: u32 = 24;

        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct ItemRow {
            pub id: ItemId,
            pub level: usize,
            pub sibling_index: usize,
            pub numbering: String,
            pub title: String,
            pub completed: bool,
            pub priority: Priority,
            pub due_label: Option<String>,
            pub indent_px: u32,
            /// Zoom factor applied to the priority and due-date badges.
            pub scale: f64,
            pub text_size: TextSize,
            pub is_bold: bool,
            pub is_italic: bool,
            pub is_underline: bool,
            pub is_empty: bool,
        }

        pub fn project(model: &OutlineModel, settings: &SettingsSnapshot) -> Vec<ItemRow> {
            let display = DateDisplay::from(settings);
            model
                .items()
                .zip(model.sibling_indices())
                .map(|(item, rank)| make_row(item, rank, settings, display))
                .collect()
        }

        fn make_row(
            item: &Item,
            sibling_index: usize,
            settings: &SettingsSnapshot,
            display: DateDisplay,
        ) -> ItemRow {
            ItemRow {
                id: item.id,
                level: item.level,
                sibling_index,
                numbering: numbering_label(item.level, sibling_index, settings.show_numbering),
                title: item.title.clone(),
                completed: item.completed,
                priority: item.priority,
                due_label: format_due(item.due_date, item.due_time, display),
                indent_px: u32::try_from(item.level)
                    .unwrap_or(u32::MAX)
                    .saturating_mul(INDENT_STEP_PX),
                scale: settings.zoom.factor(),
                text_size: item.text_size,
                is_bold: item.is_bold,
                is_italic: item.is_italic,
                is_underline: item.is_underline,
                is_empty: item.is_empty(),
            }
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::core::{DueTime, ItemPatch};
            use crate::settings::{SettingsStore, Zoom};
            use chrono::NaiveDate;
            use std::{cell::RefCell, rc::Rc};

            fn sample() -> OutlineModel {
                let mut model = OutlineModel::new();
                for (title, level) in [
                    ("Groceries", 0),
                    ("Milk", 1),
                    ("Eggs", 1),
                    ("Organic", 2),
                    ("Free range", 2),
                    ("Deep", 3),
                    ("Work", 0),
                ] {
                    model.append(Item::new(title, level));
                }
                model
            }

            #[test]
            fn numbering_follows_hierarchy() {
                let rows = project(&sample(), &SettingsSnapshot::default());
                let labels: Vec<_> = rows.iter().map(|r| r.numbering.as_str()).collect();
                assert_eq!(labels, ["1. ", "a. ", "b. ", "i. ", "ii. ", "• ", "2. "]);
                assert_eq!(rows[3].indent_px, 48);
            }

            #[test]
            fn numbering_can_be_switched_off() {
                let settings = SettingsSnapshot {
                    show_numbering: false,
                    ..SettingsSnapshot::default()
                };
                assert!(
                    project(&sample(), &settings)
                        .iter()
                        .all(|row| row.numbering.is_empty())
                );
            }

            #[test]
            fn rows_rerender_when_settings_change() {
                let mut model = sample();
                let first = model.get_index(0).map(|item| item.id).unwrap();
                model
                    .update(
                        first,
                        ItemPatch {
                            due_date: Some(NaiveDate::from_ymd_opt(2024, 3, 5)),
                            due_time: Some(DueTime::from_hm(13, 5)),
                            ..ItemPatch::default()
                        },
                    )
                    .unwrap();

                let model = Rc::new(model);
                let labels = Rc::new(RefCell::new(Vec::new()));
                let mut store = SettingsStore::default();
                {
                    let model = Rc::clone(&model);
                    let labels = Rc::clone(&labels);
                    store.subscribe(move |snapshot| {
                        let rows = project(&model, snapshot);
                        labels
                            .borrow_mut()
                            .push((rows[0].due_label.clone(), rows[0].scale));
                    });
                }

                store.set_show_day_of_week(true);
                store.set_show_year(true);
                store.set_zoom(Zoom::Percent200);

                assert_eq!(
                    *labels.borrow(),
                    vec![
                        (Some("Tuesday, Mar 5 at 1:05 PM".to_string()), 1.0),
                        (Some("Tuesday, Mar 5, 2024 at 1:05 PM".to_string()), 1.0),
                        (Some("Tuesday, Mar 5, 2024 at 1:05 PM".to_string()), 2.0),
                    ]
                );
            }

            #[test]
            fn rows_without_due_fields_have_no_label() {
                let rows = project(&sample(), &SettingsSnapshot::default());
                assert!(rows.iter().all(|row| row.due_label.is_none()));
            }
        }
    }
}

pub use commands::{OutlineCallbacks, OutlineCommand};
pub use datetime::{format_due, format_due_strings};
pub use model::{DeleteMode, OutlineModel};
pub use numbering::numbering_label;
pub use projectors::row_projector;
