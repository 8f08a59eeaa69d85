//! Todo-list editor library.
//! The editor core (list model, modal key dispatch, text and date editing) stays pure;
//! terminal, filesystem and logging collaborators sit behind small traits and are wired
//! together by the binary.

pub mod core {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};

    /* ------------------------------- Limits ------------------------------- */

    /// Maximum number of tasks held by one list.
    pub const MAX_ITEMS: usize = 1000;
    /// Maximum task text length, counted in characters.
    pub const MAX_TEXT_CHARS: usize = 255;
    /// Text of the item seeded when there is no stored list yet.
    pub const DEFAULT_ITEM_TEXT: &str = "New todo list";

    /* ------------------------------ Entities ------------------------------ */

    /// One todo entry.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskItem {
        /// Free text, at most `MAX_TEXT_CHARS` characters.
        pub text: String,
        pub deadline: NaiveDate,
        #[serde(default)]
        pub completed: bool,
    }

    impl TaskItem {
        /// Creates an open task; over-long text is cut at `MAX_TEXT_CHARS`.
        pub fn new(text: impl Into<String>, deadline: NaiveDate) -> Self {
            Self {
                text: truncate_chars(text.into(), MAX_TEXT_CHARS),
                deadline,
                completed: false,
            }
        }

        pub fn char_len(&self) -> usize {
            self.text.chars().count()
        }
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: the ordered, capacity-bounded task list.
    ///
    /// Index order is display order. Every mutation is bounds-checked and reports a refusal
    /// through `EditError` instead of touching the list.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ItemList {
        items: Vec<TaskItem>,
    }

    impl ItemList {
        pub fn new() -> Self {
            Self { items: Vec::new() }
        }

        /// The list a brand-new todo file starts with.
        pub fn with_default_item(today: NaiveDate) -> Self {
            Self {
                items: vec![TaskItem::new(DEFAULT_ITEM_TEXT, today)],
            }
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }

        pub fn is_full(&self) -> bool {
            self.items.len() >= MAX_ITEMS
        }

        pub fn get(&self, index: usize) -> Option<&TaskItem> {
            self.items.get(index)
        }

        pub fn get_mut(&mut self, index: usize) -> Option<&mut TaskItem> {
            self.items.get_mut(index)
        }

        pub fn iter(&self) -> std::slice::Iter<'_, TaskItem> {
            self.items.iter()
        }

        pub fn into_vec(self) -> Vec<TaskItem> {
            self.items
        }

        /// Appends at the tail.
        pub fn push(&mut self, item: TaskItem) -> Result<(), EditError> {
            let index = self.items.len();
            self.insert_item(index, item)
        }

        /// Inserts a fresh open task with today's deadline at `index`, shifting later items down.
        pub fn insert(&mut self, index: usize, text: &str) -> Result<(), EditError> {
            self.insert_item(index, TaskItem::new(text, crate::date::today()))
        }

        pub fn insert_item(&mut self, index: usize, item: TaskItem) -> Result<(), EditError> {
            if self.is_full() {
                return Err(EditError::CapacityExceeded {
                    capacity: MAX_ITEMS,
                });
            }
            if index > self.items.len() {
                return Err(EditError::OutOfRange {
                    index,
                    len: self.items.len(),
                });
            }
            self.items.insert(index, item);
            Ok(())
        }

        /// Removes and returns the item at `index`, shifting later items up.
        pub fn delete(&mut self, index: usize) -> Result<TaskItem, EditError> {
            if index >= self.items.len() {
                return Err(EditError::OutOfRange {
                    index,
                    len: self.items.len(),
                });
            }
            Ok(self.items.remove(index))
        }

        /// Moves the item at `index` to the tail; the items after it close the gap.
        /// Already-last items stay put.
        pub fn move_to_tail(&mut self, index: usize) -> Result<(), EditError> {
            let len = self.items.len();
            if index >= len {
                return Err(EditError::OutOfRange { index, len });
            }
            if index + 1 == len {
                return Ok(());
            }
            let item = self.items.remove(index);
            self.items.push(item);
            Ok(())
        }
    }

    impl From<Vec<TaskItem>> for ItemList {
        /// Keeps at most `MAX_ITEMS` entries.
        fn from(mut items: Vec<TaskItem>) -> Self {
            items.truncate(MAX_ITEMS);
            Self { items }
        }
    }

    impl<'a> IntoIterator for &'a ItemList {
        type Item = &'a TaskItem;
        type IntoIter = std::slice::Iter<'a, TaskItem>;

        fn into_iter(self) -> Self::IntoIter {
            self.items.iter()
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum EditError {
        #[error("list is full ({capacity} items)")]
        CapacityExceeded { capacity: usize },
        #[error("text is at its maximum length ({max} characters)")]
        TextTooLong { max: usize },
        #[error("index {index} is out of range (len {len})")]
        OutOfRange { index: usize, len: usize },
    }

    /* ------------------------------- Helpers ------------------------------- */

    /// Cuts `s` after `max` characters.
    pub fn truncate_chars(mut s: String, max: usize) -> String {
        if let Some((byte_idx, _)) = s.char_indices().nth(max) {
            s.truncate(byte_idx);
        }
        s
    }

    /// Byte index of character offset `col`; `col == chars` maps to the end of the string.
    pub fn byte_offset(s: &str, col: usize) -> Option<usize> {
        match s.char_indices().nth(col) {
            Some((byte_idx, _)) => Some(byte_idx),
            None if s.chars().count() == col => Some(s.len()),
            None => None,
        }
    }

}

pub mod date {
    //! Calendar arithmetic for deadlines.
    //!
    //! Field adjustment wraps inside the field instead of carrying into the next one:
    //! day 31 + 1 of January becomes day 1 of January, not February 1st.

    use chrono::{Datelike, Local, NaiveDate};
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, map_res},
        sequence::tuple,
    };

    pub const MIN_YEAR: i32 = 1900;
    pub const MAX_YEAR: i32 = 2100;

    const DAYS_PER_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    /// One of the three editable parts of a deadline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum DateField {
        #[default]
        Day,
        Month,
        Year,
    }

    impl DateField {
        pub const ALL: [DateField; 3] = [DateField::Day, DateField::Month, DateField::Year];

        pub fn next(self) -> Self {
            match self {
                DateField::Day => DateField::Month,
                DateField::Month => DateField::Year,
                DateField::Year => DateField::Day,
            }
        }

        pub fn prev(self) -> Self {
            match self {
                DateField::Day => DateField::Year,
                DateField::Month => DateField::Day,
                DateField::Year => DateField::Month,
            }
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                DateField::Day => "day",
                DateField::Month => "month",
                DateField::Year => "year",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DateError {
        #[error("expected DD.MM.YYYY, got {0:?}")]
        Format(String),
        #[error("{day:02}.{month:02}.{year:04} is not a calendar date")]
        InvalidDate { day: u32, month: u32, year: i32 },
    }

    /// Current local date.
    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    pub fn is_leap_year(year: i32) -> bool {
        (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
    }

    /// Length of `month` (1..=12) in `year`; 0 for a month outside that range.
    pub fn days_in_month(month: u32, year: i32) -> u32 {
        match month {
            2 if is_leap_year(year) => 29,
            1..=12 => DAYS_PER_MONTH[(month - 1) as usize],
            _ => 0,
        }
    }

    /// Parses `DD.MM.YYYY` (one-digit day and month are accepted).
    pub fn parse_date(s: &str) -> Result<NaiveDate, DateError> {
        let (_, (day, month, year)) =
            all_consuming(day_month_year)(s.trim()).map_err(|_| DateError::Format(s.to_string()))?;
        NaiveDate::from_ymd_opt(year, month, day).ok_or(DateError::InvalidDate { day, month, year })
    }

    pub fn format_date(date: NaiveDate) -> String {
        format!("{:02}.{:02}.{:04}", date.day(), date.month(), date.year())
    }

    /// Applies `delta` to one field of `date`.
    ///
    /// - Day wraps within the current month.
    /// - Month wraps within 1..=12, clamping the day to the new month's length.
    /// - Year is clamped to `MIN_YEAR..=MAX_YEAR`, clamping Feb 29 in non-leap years.
    pub fn adjust_field(date: NaiveDate, field: DateField, delta: i32) -> NaiveDate {
        let mut day = date.day() as i32;
        let mut month = date.month() as i32;
        let mut year = date.year();

        match field {
            DateField::Day => {
                let last = days_in_month(month as u32, year) as i32;
                day = (day - 1 + delta).rem_euclid(last) + 1;
            }
            DateField::Month => {
                month = (month - 1 + delta).rem_euclid(12) + 1;
                day = day.min(days_in_month(month as u32, year) as i32);
            }
            DateField::Year => {
                year = year.saturating_add(delta).clamp(MIN_YEAR, MAX_YEAR);
                day = day.min(days_in_month(month as u32, year) as i32);
            }
        }

        NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap_or(date)
    }

    /// String-level `adjust_field`: unparsable input resets to today instead of failing.
    pub fn adjust_date_str(s: &str, field: DateField, delta: i32) -> String {
        match parse_date(s) {
            Ok(date) => format_date(adjust_field(date, field, delta)),
            Err(_) => format_date(today()),
        }
    }

    type PResult<'a, T> = IResult<&'a str, T>;

    fn day_month_year(i: &str) -> PResult<'_, (u32, u32, i32)> {
        let (i, (day, _, month, _, year)) = tuple((
            map_res(take_while_m_n(1, 2, is_digit), |s: &str| s.parse::<u32>()),
            char('.'),
            map_res(take_while_m_n(1, 2, is_digit), |s: &str| s.parse::<u32>()),
            char('.'),
            map_res(take_while_m_n(4, 4, is_digit), |s: &str| s.parse::<i32>()),
        ))(i)?;
        Ok((i, (day, month, year)))
    }

    fn is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

}

pub mod text {
    //! Single-line text mutation at a cursor.
    //!
    //! A `Position` names an item (`row`) and a character offset into its text (`col`).
    //! Operations return the cursor position after the edit, or an `EditError` when the
    //! edit would overflow a limit; refused edits leave the list untouched.

    use crate::core::{EditError, ItemList, MAX_TEXT_CHARS, byte_offset};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Position {
        pub row: usize,
        pub col: usize,
    }

    impl Position {
        pub const fn new(row: usize, col: usize) -> Self {
            Self { row, col }
        }

        pub const fn zero() -> Self {
            Self { row: 0, col: 0 }
        }
    }

    /// Inserts `ch` at the cursor.
    pub fn insert_char(items: &mut ItemList, pos: Position, ch: char) -> Result<Position, EditError> {
        let len = items.len();
        let item = items.get_mut(pos.row).ok_or(EditError::OutOfRange {
            index: pos.row,
            len,
        })?;
        let chars = item.char_len();
        if chars >= MAX_TEXT_CHARS {
            return Err(EditError::TextTooLong {
                max: MAX_TEXT_CHARS,
            });
        }
        let at = byte_offset(&item.text, pos.col).ok_or(EditError::OutOfRange {
            index: pos.col,
            len: chars,
        })?;
        item.text.insert(at, ch);
        Ok(Position::new(pos.row, pos.col + 1))
    }

    /// Backspace: removes the character before the cursor, or at column 0 joins the item
    /// onto the end of the previous one.
    pub fn delete_before_cursor(items: &mut ItemList, pos: Position) -> Result<Position, EditError> {
        let len = items.len();
        let item = items.get_mut(pos.row).ok_or(EditError::OutOfRange {
            index: pos.row,
            len,
        })?;

        if pos.col > 0 {
            let chars = item.char_len();
            if pos.col > chars {
                return Err(EditError::OutOfRange {
                    index: pos.col,
                    len: chars,
                });
            }
            let at = byte_offset(&item.text, pos.col - 1).ok_or(EditError::OutOfRange {
                index: pos.col,
                len: chars,
            })?;
            item.text.remove(at);
            return Ok(Position::new(pos.row, pos.col - 1));
        }

        if pos.row == 0 {
            return Err(EditError::OutOfRange { index: 0, len });
        }
        join_with_previous(items, pos.row)
    }

    /// Enter: moves the text after the cursor into a new item right below.
    pub fn split_at_cursor(items: &mut ItemList, pos: Position) -> Result<Position, EditError> {
        let len = items.len();
        let item = items.get(pos.row).ok_or(EditError::OutOfRange {
            index: pos.row,
            len,
        })?;
        let at = byte_offset(&item.text, pos.col).ok_or(EditError::OutOfRange {
            index: pos.col,
            len: item.char_len(),
        })?;
        let tail = item.text[at..].to_string();

        items.insert(pos.row + 1, &tail)?;
        if let Some(item) = items.get_mut(pos.row) {
            item.text.truncate(at);
        }
        Ok(Position::new(pos.row + 1, 0))
    }

    fn join_with_previous(items: &mut ItemList, row: usize) -> Result<Position, EditError> {
        let len = items.len();
        let prev_len = items
            .get(row - 1)
            .map(|item| item.char_len())
            .ok_or(EditError::OutOfRange { index: row - 1, len })?;
        let cur_len = items
            .get(row)
            .map(|item| item.char_len())
            .ok_or(EditError::OutOfRange { index: row, len })?;
        if prev_len + cur_len > MAX_TEXT_CHARS {
            return Err(EditError::TextTooLong {
                max: MAX_TEXT_CHARS,
            });
        }

        let removed = items.delete(row)?;
        if let Some(prev) = items.get_mut(row - 1) {
            prev.text.push_str(&removed.text);
        }
        Ok(Position::new(row - 1, prev_len))
    }

}

pub mod editor {
    //! Modal key dispatch.
    //!
    //! `Editor` owns the task list and the editor state and is the only thing that mutates
    //! them. Each key runs to completion and reports an `Outcome`; persistence is requested
    //! through the outcome, never performed here.

    use crate::core::{EditError, ItemList};
    use crate::date::{self, DateField};
    use crate::render::{self, Frame, Viewport};
    use crate::text::{self, Position};
    use log::debug;

    pub const MIN_LAYOUT_COLS: u16 = 80;
    pub const MAX_LAYOUT_COLS: u16 = 200;
    pub const LAYOUT_STEP: u16 = 10;

    /// Platform-independent key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Key {
        Char(char),
        Enter,
        Escape,
        Backspace,
        /// Delete-forward.
        Delete,
        Up,
        Down,
        Left,
        Right,
        /// Ctrl+C.
        Interrupt,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum Mode {
        /// Navigation and list commands.
        #[default]
        Normal,
        /// In-line text editing of the selected item.
        TextEdit,
        /// Field-wise adjustment of the selected item's deadline.
        DateEdit,
    }

    impl Mode {
        pub fn as_str(&self) -> &'static str {
            match self {
                Mode::Normal => "NORMAL",
                Mode::TextEdit => "EDIT",
                Mode::DateEdit => "TIME",
            }
        }
    }

    /// Normal-mode command decoded from a key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Command {
        MoveUp,
        MoveDown,
        MarkComplete,
        EditText,
        EditDate,
        OpenBelow,
        OpenAbove,
        DeleteItem,
        Save,
        ToggleAutosave,
        Widen,
        Narrow,
        Quit,
    }

    impl Command {
        pub fn from_key(key: Key) -> Option<Self> {
            match key {
                Key::Up => Some(Command::MoveUp),
                Key::Down => Some(Command::MoveDown),
                Key::Char('d') => Some(Command::MarkComplete),
                Key::Char('i') => Some(Command::EditText),
                Key::Char('t') => Some(Command::EditDate),
                Key::Char('o') => Some(Command::OpenBelow),
                Key::Char('O') => Some(Command::OpenAbove),
                Key::Char('x') => Some(Command::DeleteItem),
                Key::Char('s') => Some(Command::Save),
                Key::Char('a') => Some(Command::ToggleAutosave),
                Key::Char('+') | Key::Char('=') => Some(Command::Widen),
                Key::Char('-') | Key::Char('_') => Some(Command::Narrow),
                Key::Char('q') => Some(Command::Quit),
                _ => None,
            }
        }
    }

    /// Outcome from applying a key to the editor.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Outcome {
        /// Nothing changed.
        Unchanged,
        /// Display state changed; nothing to persist.
        Changed,
        /// A mutation was committed while autosave is on; the host should write the list.
        Persist,
        /// Explicit save request, independent of autosave.
        Save,
        Quit,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EditorState {
        pub mode: Mode,
        /// Selected item; 0 when the list is empty.
        pub selected: usize,
        /// Character offset into the selected text (TextEdit).
        pub cursor: usize,
        /// Field under adjustment (DateEdit).
        pub date_field: DateField,
        /// First visible item, cached by the render projection.
        pub scroll: usize,
        /// Terminal width seen by the last projection.
        pub viewport_cols: u16,
        /// Layout width chosen with the widen/narrow commands.
        pub width_override: Option<u16>,
        pub autosave: bool,
        /// Label shown in the status line.
        pub filename: String,
        /// One-shot notice shown until the next key.
        pub status_message: Option<String>,
    }

    impl EditorState {
        pub fn new(filename: impl Into<String>, autosave: bool) -> Self {
            Self {
                mode: Mode::Normal,
                selected: 0,
                cursor: 0,
                date_field: DateField::Day,
                scroll: 0,
                viewport_cols: MIN_LAYOUT_COLS,
                width_override: None,
                autosave,
                filename: filename.into(),
                status_message: None,
            }
        }
    }

    /// Editor state machine.
    pub struct Editor {
        items: ItemList,
        state: EditorState,
    }

    impl Editor {
        pub fn new(items: ItemList, filename: impl Into<String>, autosave: bool) -> Self {
            Self {
                items,
                state: EditorState::new(filename, autosave),
            }
        }

        /// Apply a key event and return the outcome.
        pub fn apply_key(&mut self, key: Key) -> Outcome {
            self.state.status_message = None;
            if key == Key::Interrupt {
                return Outcome::Quit;
            }

            let before = self.state.mode;
            let outcome = match self.state.mode {
                Mode::Normal => self.handle_normal_mode(key),
                Mode::TextEdit => self.handle_text_mode(key),
                Mode::DateEdit => self.handle_date_mode(key),
            };
            if self.state.mode != before {
                debug!(
                    "event=mode_change module=editor from={} to={}",
                    before.as_str(),
                    self.state.mode.as_str()
                );
            }
            outcome
        }

        /// Project the current list and state for display.
        pub fn frame(&mut self, viewport: Viewport) -> Frame {
            render::project(&self.items, &mut self.state, viewport)
        }

        pub fn items(&self) -> &ItemList {
            &self.items
        }

        pub fn state(&self) -> &EditorState {
            &self.state
        }

        pub fn mode(&self) -> Mode {
            self.state.mode
        }

        pub fn position(&self) -> Position {
            Position::new(self.state.selected, self.state.cursor)
        }

        pub fn set_status_message(&mut self, message: impl Into<String>) {
            self.state.status_message = Some(message.into());
        }

        // Mode handlers

        fn handle_normal_mode(&mut self, key: Key) -> Outcome {
            let Some(command) = Command::from_key(key) else {
                return Outcome::Unchanged;
            };
            let selected = self.state.selected;

            match command {
                Command::MoveUp => {
                    if selected == 0 {
                        return Outcome::Unchanged;
                    }
                    self.state.selected -= 1;
                    Outcome::Changed
                }
                Command::MoveDown => {
                    if selected + 1 >= self.items.len() {
                        return Outcome::Unchanged;
                    }
                    self.state.selected += 1;
                    Outcome::Changed
                }
                Command::MarkComplete => {
                    let Some(item) = self.items.get_mut(selected) else {
                        return Outcome::Unchanged;
                    };
                    item.completed = true;
                    if let Err(err) = self.items.move_to_tail(selected) {
                        return self.refused("mark_complete", err);
                    }
                    self.clamp_selection();
                    self.commit()
                }
                Command::EditText => {
                    let Some(item) = self.items.get(selected) else {
                        return Outcome::Unchanged;
                    };
                    self.state.cursor = item.char_len();
                    self.state.mode = Mode::TextEdit;
                    Outcome::Changed
                }
                Command::EditDate => {
                    if self.items.get(selected).is_none() {
                        return Outcome::Unchanged;
                    }
                    self.state.date_field = DateField::Day;
                    self.state.mode = Mode::DateEdit;
                    Outcome::Changed
                }
                Command::OpenBelow => {
                    let index = if self.items.is_empty() { 0 } else { selected + 1 };
                    self.open_item_at(index)
                }
                Command::OpenAbove => self.open_item_at(selected),
                Command::DeleteItem => match self.items.delete(selected) {
                    Ok(_) => {
                        self.clamp_selection();
                        self.commit()
                    }
                    Err(err) => self.refused("delete_item", err),
                },
                Command::Save => Outcome::Save,
                Command::ToggleAutosave => {
                    self.state.autosave = !self.state.autosave;
                    debug!(
                        "event=autosave_toggle module=editor enabled={}",
                        self.state.autosave
                    );
                    Outcome::Changed
                }
                Command::Widen => {
                    let cols = self.layout_cols();
                    if cols >= MAX_LAYOUT_COLS {
                        return Outcome::Unchanged;
                    }
                    self.state.width_override = Some((cols + LAYOUT_STEP).min(MAX_LAYOUT_COLS));
                    Outcome::Changed
                }
                Command::Narrow => {
                    let cols = self.layout_cols();
                    if cols <= MIN_LAYOUT_COLS {
                        return Outcome::Unchanged;
                    }
                    self.state.width_override = Some((cols - LAYOUT_STEP).max(MIN_LAYOUT_COLS));
                    Outcome::Changed
                }
                Command::Quit => Outcome::Quit,
            }
        }

        fn handle_text_mode(&mut self, key: Key) -> Outcome {
            match key {
                Key::Escape => {
                    self.state.mode = Mode::Normal;
                    self.commit()
                }
                Key::Enter => self.apply_edit("split_at_cursor", text::split_at_cursor),
                Key::Left => {
                    if self.state.cursor == 0 {
                        return Outcome::Unchanged;
                    }
                    self.state.cursor -= 1;
                    Outcome::Changed
                }
                Key::Right => {
                    if self.state.cursor >= self.selected_len() {
                        return Outcome::Unchanged;
                    }
                    self.state.cursor += 1;
                    Outcome::Changed
                }
                Key::Up => {
                    if self.state.selected == 0 {
                        return Outcome::Unchanged;
                    }
                    self.state.selected -= 1;
                    self.state.cursor = self.selected_len();
                    Outcome::Changed
                }
                Key::Down => {
                    if self.state.selected + 1 >= self.items.len() {
                        return Outcome::Unchanged;
                    }
                    self.state.selected += 1;
                    self.state.cursor = self.selected_len();
                    Outcome::Changed
                }
                Key::Backspace | Key::Delete => {
                    self.apply_edit("delete_before_cursor", text::delete_before_cursor)
                }
                Key::Char(ch) if !ch.is_control() => {
                    self.apply_edit("insert_char", |items, pos| text::insert_char(items, pos, ch))
                }
                _ => Outcome::Unchanged,
            }
        }

        fn handle_date_mode(&mut self, key: Key) -> Outcome {
            match key {
                Key::Escape | Key::Enter => {
                    self.state.mode = Mode::Normal;
                    self.commit()
                }
                Key::Left => {
                    self.state.date_field = self.state.date_field.prev();
                    Outcome::Changed
                }
                Key::Right => {
                    self.state.date_field = self.state.date_field.next();
                    Outcome::Changed
                }
                Key::Up => self.adjust_deadline(1),
                Key::Down => self.adjust_deadline(-1),
                _ => Outcome::Unchanged,
            }
        }

        // Helpers

        fn open_item_at(&mut self, index: usize) -> Outcome {
            match self.items.insert(index, "") {
                Ok(()) => {
                    self.state.selected = index;
                    self.state.cursor = 0;
                    self.state.mode = Mode::TextEdit;
                    self.commit()
                }
                Err(err) => self.refused("open_item", err),
            }
        }

        fn apply_edit<F>(&mut self, op: &'static str, edit: F) -> Outcome
        where
            F: FnOnce(&mut ItemList, Position) -> Result<Position, EditError>,
        {
            let pos = self.position();
            match edit(&mut self.items, pos) {
                Ok(pos) => {
                    self.state.selected = pos.row;
                    self.state.cursor = pos.col;
                    self.commit()
                }
                Err(err) => self.refused(op, err),
            }
        }

        fn adjust_deadline(&mut self, delta: i32) -> Outcome {
            let field = self.state.date_field;
            let Some(item) = self.items.get_mut(self.state.selected) else {
                return Outcome::Unchanged;
            };
            item.deadline = date::adjust_field(item.deadline, field, delta);
            self.commit()
        }

        fn commit(&self) -> Outcome {
            if self.state.autosave {
                Outcome::Persist
            } else {
                Outcome::Changed
            }
        }

        fn refused(&self, op: &str, err: EditError) -> Outcome {
            debug!("event=edit_refused module=editor op={} reason={}", op, err);
            Outcome::Unchanged
        }

        fn selected_len(&self) -> usize {
            self.items
                .get(self.state.selected)
                .map(|item| item.char_len())
                .unwrap_or(0)
        }

        fn clamp_selection(&mut self) {
            let len = self.items.len();
            if self.state.selected >= len {
                self.state.selected = len.saturating_sub(1);
            }
        }

        fn layout_cols(&self) -> u16 {
            self.state.width_override.unwrap_or(self.state.viewport_cols)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{MAX_ITEMS, TaskItem};
        use chrono::NaiveDate;

        fn date(d: u32, m: u32, y: i32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
        }

        fn editor(texts: &[&str]) -> Editor {
            let items: ItemList = texts
                .iter()
                .map(|t| TaskItem::new(*t, date(31, 1, 2024)))
                .collect::<Vec<_>>()
                .into();
            Editor::new(items, "todo.txt", true)
        }

        fn texts(editor: &Editor) -> Vec<String> {
            editor.items().iter().map(|i| i.text.clone()).collect()
        }

        fn type_str(editor: &mut Editor, s: &str) {
            for ch in s.chars() {
                editor.apply_key(Key::Char(ch));
            }
        }

        #[test]
        fn new_editor_starts_in_normal_mode() {
            let editor = editor(&["a"]);
            assert_eq!(editor.mode(), Mode::Normal);
            assert_eq!(editor.position(), Position::zero());
            assert!(editor.state().autosave);
        }

        #[test]
        fn navigation_is_clamped_to_list() {
            let mut editor = editor(&["a", "b"]);
            assert_eq!(editor.apply_key(Key::Up), Outcome::Unchanged);
            assert_eq!(editor.apply_key(Key::Down), Outcome::Changed);
            assert_eq!(editor.state().selected, 1);
            assert_eq!(editor.apply_key(Key::Down), Outcome::Unchanged);
            assert_eq!(editor.state().selected, 1);
        }

        #[test]
        fn unknown_normal_key_is_ignored() {
            let mut editor = editor(&["a"]);
            assert_eq!(editor.apply_key(Key::Char('z')), Outcome::Unchanged);
            assert_eq!(editor.apply_key(Key::Enter), Outcome::Unchanged);
        }

        #[test]
        fn mark_complete_moves_item_to_tail() {
            let mut editor = editor(&["a", "b", "c"]);
            editor.apply_key(Key::Down);
            assert_eq!(editor.apply_key(Key::Char('d')), Outcome::Persist);
            assert_eq!(texts(&editor), vec!["a", "c", "b"]);
            assert!(editor.items().get(2).expect("tail").completed);
            assert!(!editor.items().get(1).expect("c").completed);
            // Selection stays on the slot, now holding the bumped item.
            assert_eq!(editor.state().selected, 1);
        }

        #[test]
        fn mark_complete_on_last_item_keeps_selection_valid() {
            let mut editor = editor(&["a", "b"]);
            editor.apply_key(Key::Down);
            editor.apply_key(Key::Char('d'));
            assert_eq!(texts(&editor), vec!["a", "b"]);
            assert_eq!(editor.state().selected, 1);
        }

        #[test]
        fn enter_text_edit_places_cursor_at_end() {
            let mut editor = editor(&["hello"]);
            assert_eq!(editor.apply_key(Key::Char('i')), Outcome::Changed);
            assert_eq!(editor.mode(), Mode::TextEdit);
            assert_eq!(editor.position(), Position::new(0, 5));
        }

        #[test]
        fn typing_inserts_and_persists_each_key() {
            let mut editor = editor(&["ac"]);
            editor.apply_key(Key::Char('i'));
            editor.apply_key(Key::Left);
            assert_eq!(editor.apply_key(Key::Char('b')), Outcome::Persist);
            assert_eq!(texts(&editor), vec!["abc"]);
            assert_eq!(editor.position(), Position::new(0, 2));
        }

        #[test]
        fn normal_mode_letters_are_text_in_edit_mode() {
            let mut editor = editor(&[""]);
            editor.apply_key(Key::Char('i'));
            type_str(&mut editor, "dtoxsaq+-");
            assert_eq!(texts(&editor), vec!["dtoxsaq+-"]);
            assert_eq!(editor.mode(), Mode::TextEdit);
        }

        #[test]
        fn control_characters_are_not_inserted() {
            let mut editor = editor(&["a"]);
            editor.apply_key(Key::Char('i'));
            assert_eq!(editor.apply_key(Key::Char('\t')), Outcome::Unchanged);
            assert_eq!(texts(&editor), vec!["a"]);
        }

        #[test]
        fn cursor_moves_within_text_bounds() {
            let mut editor = editor(&["ab"]);
            editor.apply_key(Key::Char('i'));
            assert_eq!(editor.apply_key(Key::Right), Outcome::Unchanged);
            editor.apply_key(Key::Left);
            editor.apply_key(Key::Left);
            assert_eq!(editor.apply_key(Key::Left), Outcome::Unchanged);
            assert_eq!(editor.position(), Position::new(0, 0));
        }

        #[test]
        fn up_down_in_edit_mode_jump_to_line_end() {
            let mut editor = editor(&["short", "much longer"]);
            editor.apply_key(Key::Char('i'));
            editor.apply_key(Key::Down);
            assert_eq!(editor.position(), Position::new(1, 11));
            editor.apply_key(Key::Up);
            assert_eq!(editor.position(), Position::new(0, 5));
        }

        #[test]
        fn enter_splits_and_backspace_joins() {
            let mut editor = editor(&["hello world"]);
            editor.apply_key(Key::Char('i'));
            for _ in 0..6 {
                editor.apply_key(Key::Left);
            }
            assert_eq!(editor.apply_key(Key::Enter), Outcome::Persist);
            assert_eq!(texts(&editor), vec!["hello", " world"]);
            assert_eq!(editor.position(), Position::new(1, 0));
            assert_eq!(editor.mode(), Mode::TextEdit);

            assert_eq!(editor.apply_key(Key::Backspace), Outcome::Persist);
            assert_eq!(texts(&editor), vec!["hello world"]);
            assert_eq!(editor.position(), Position::new(0, 5));
        }

        #[test]
        fn delete_key_behaves_like_backspace() {
            let mut editor = editor(&["abc"]);
            editor.apply_key(Key::Char('i'));
            editor.apply_key(Key::Delete);
            assert_eq!(texts(&editor), vec!["ab"]);
        }

        #[test]
        fn refused_backspace_does_not_persist() {
            let mut editor = editor(&["abc"]);
            editor.apply_key(Key::Char('i'));
            for _ in 0..3 {
                editor.apply_key(Key::Left);
            }
            assert_eq!(editor.apply_key(Key::Backspace), Outcome::Unchanged);
            assert_eq!(texts(&editor), vec!["abc"]);
        }

        #[test]
        fn escape_leaves_text_edit() {
            let mut editor = editor(&["a"]);
            editor.apply_key(Key::Char('i'));
            assert_eq!(editor.apply_key(Key::Escape), Outcome::Persist);
            assert_eq!(editor.mode(), Mode::Normal);
        }

        #[test]
        fn open_below_and_above_insert_empty_items() {
            let mut editor = editor(&["a", "b"]);
            assert_eq!(editor.apply_key(Key::Char('o')), Outcome::Persist);
            assert_eq!(texts(&editor), vec!["a", "", "b"]);
            assert_eq!(editor.position(), Position::new(1, 0));
            assert_eq!(editor.mode(), Mode::TextEdit);
            type_str(&mut editor, "x");
            editor.apply_key(Key::Escape);

            editor.apply_key(Key::Char('O'));
            assert_eq!(texts(&editor), vec!["a", "", "x", "b"]);
            assert_eq!(editor.position(), Position::new(1, 0));
        }

        #[test]
        fn open_on_empty_list_inserts_first_item() {
            let mut editor = Editor::new(ItemList::new(), "todo.txt", false);
            assert_eq!(editor.apply_key(Key::Char('o')), Outcome::Changed);
            assert_eq!(editor.items().len(), 1);
            assert_eq!(editor.position(), Position::zero());
        }

        #[test]
        fn open_on_full_list_is_refused() {
            let full: Vec<TaskItem> = (0..MAX_ITEMS).map(|_| TaskItem::new("t", date(1, 1, 2024))).collect();
            let mut editor = Editor::new(full.into(), "todo.txt", true);
            assert_eq!(editor.apply_key(Key::Char('o')), Outcome::Unchanged);
            assert_eq!(editor.mode(), Mode::Normal);
            assert_eq!(editor.items().len(), MAX_ITEMS);
        }

        #[test]
        fn delete_item_clamps_selection() {
            let mut editor = editor(&["a", "b"]);
            editor.apply_key(Key::Down);
            assert_eq!(editor.apply_key(Key::Char('x')), Outcome::Persist);
            assert_eq!(texts(&editor), vec!["a"]);
            assert_eq!(editor.state().selected, 0);
            editor.apply_key(Key::Char('x'));
            assert!(editor.items().is_empty());
            assert_eq!(editor.state().selected, 0);
            assert_eq!(editor.apply_key(Key::Char('x')), Outcome::Unchanged);
        }

        #[test]
        fn selection_commands_do_nothing_on_empty_list() {
            let mut editor = Editor::new(ItemList::new(), "todo.txt", true);
            for key in ['d', 'i', 't', 'x'] {
                assert_eq!(editor.apply_key(Key::Char(key)), Outcome::Unchanged);
                assert_eq!(editor.mode(), Mode::Normal);
            }
        }

        #[test]
        fn save_is_independent_of_autosave() {
            let mut editor = editor(&["a"]);
            editor.apply_key(Key::Char('a'));
            assert!(!editor.state().autosave);
            assert_eq!(editor.apply_key(Key::Char('s')), Outcome::Save);
        }

        #[test]
        fn autosave_off_reports_changed_instead_of_persist() {
            let mut editor = editor(&["a"]);
            assert_eq!(editor.apply_key(Key::Char('a')), Outcome::Changed);
            editor.apply_key(Key::Char('i'));
            assert_eq!(editor.apply_key(Key::Char('b')), Outcome::Changed);
            editor.apply_key(Key::Escape);
            assert_eq!(editor.apply_key(Key::Char('a')), Outcome::Changed);
            assert!(editor.state().autosave);
        }

        #[test]
        fn quit_and_interrupt() {
            let mut editor = editor(&["a"]);
            assert_eq!(editor.apply_key(Key::Char('q')), Outcome::Quit);
            editor.apply_key(Key::Char('i'));
            assert_eq!(editor.apply_key(Key::Char('q')), Outcome::Persist);
            assert_eq!(editor.apply_key(Key::Interrupt), Outcome::Quit);
        }

        #[test]
        fn date_edit_cycles_fields_and_adjusts_deadline() {
            let mut editor = editor(&["a"]);
            assert_eq!(editor.apply_key(Key::Char('t')), Outcome::Changed);
            assert_eq!(editor.mode(), Mode::DateEdit);
            assert_eq!(editor.state().date_field, DateField::Day);

            assert_eq!(editor.apply_key(Key::Up), Outcome::Persist);
            assert_eq!(editor.items().get(0).map(|i| i.deadline), Some(date(1, 1, 2024)));

            editor.apply_key(Key::Down);
            editor.apply_key(Key::Right);
            assert_eq!(editor.state().date_field, DateField::Month);
            editor.apply_key(Key::Up);
            assert_eq!(editor.items().get(0).map(|i| i.deadline), Some(date(29, 2, 2024)));

            editor.apply_key(Key::Left);
            editor.apply_key(Key::Left);
            assert_eq!(editor.state().date_field, DateField::Year);
            editor.apply_key(Key::Up);
            assert_eq!(editor.items().get(0).map(|i| i.deadline), Some(date(28, 2, 2025)));

            assert_eq!(editor.apply_key(Key::Enter), Outcome::Persist);
            assert_eq!(editor.mode(), Mode::Normal);
        }

        #[test]
        fn reentering_date_edit_resets_field() {
            let mut editor = editor(&["a"]);
            editor.apply_key(Key::Char('t'));
            editor.apply_key(Key::Right);
            editor.apply_key(Key::Escape);
            editor.apply_key(Key::Char('t'));
            assert_eq!(editor.state().date_field, DateField::Day);
        }

        #[test]
        fn widen_and_narrow_stay_within_limits() {
            let mut editor = editor(&["a"]);
            assert_eq!(editor.apply_key(Key::Char('-')), Outcome::Unchanged);
            assert_eq!(editor.apply_key(Key::Char('+')), Outcome::Changed);
            assert_eq!(editor.state().width_override, Some(90));
            editor.apply_key(Key::Char('_'));
            assert_eq!(editor.state().width_override, Some(80));
            for _ in 0..20 {
                editor.apply_key(Key::Char('='));
            }
            assert_eq!(editor.state().width_override, Some(MAX_LAYOUT_COLS));
        }

        #[test]
        fn widen_and_narrow_clamp_odd_terminal_widths() {
            let mut narrow = editor(&["a"]);
            narrow.frame(Viewport::new(10, 85));
            assert_eq!(narrow.apply_key(Key::Char('-')), Outcome::Changed);
            assert_eq!(narrow.state().width_override, Some(MIN_LAYOUT_COLS));
            assert_eq!(narrow.apply_key(Key::Char('-')), Outcome::Unchanged);

            let mut wide = editor(&["a"]);
            wide.frame(Viewport::new(10, 195));
            assert_eq!(wide.apply_key(Key::Char('+')), Outcome::Changed);
            assert_eq!(wide.state().width_override, Some(MAX_LAYOUT_COLS));
            assert_eq!(wide.apply_key(Key::Char('+')), Outcome::Unchanged);
        }

        #[test]
        fn status_message_is_cleared_by_next_key() {
            let mut editor = editor(&["a"]);
            editor.set_status_message("File saved");
            assert_eq!(editor.state().status_message.as_deref(), Some("File saved"));
            editor.apply_key(Key::Char('z'));
            assert_eq!(editor.state().status_message, None);
        }

        #[test]
        fn command_decoding() {
            assert_eq!(Command::from_key(Key::Char('O')), Some(Command::OpenAbove));
            assert_eq!(Command::from_key(Key::Char('=')), Some(Command::Widen));
            assert_eq!(Command::from_key(Key::Left), None);
            assert_eq!(Mode::DateEdit.as_str(), "TIME");
        }
    }
}

pub mod render {
    //! Display projection. Builds a structured `Frame` (rows of plain or highlighted spans)
    //! from the list and editor state; escape codes are the terminal adapter's business.

    use crate::core::{ItemList, TaskItem};
    use crate::date::{self, DateField};
    use crate::editor::{EditorState, Mode};
    use chrono::{Datelike, NaiveDate};

    /// Width of the `DD.MM.YYYY` column including its separator.
    const DATE_COLUMN: usize = 11;
    /// Marker, brackets and margins around the text column.
    const ROW_CHROME: usize = 15;

    pub const CURSOR_MARKER: char = '|';
    pub const COMPLETED_MARKER: &str = "D    ";
    pub const OPEN_MARKER: &str = "     ";
    pub const FILLER: &str = "~";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Viewport {
        pub rows: u16,
        pub cols: u16,
    }

    impl Viewport {
        pub const fn new(rows: u16, cols: u16) -> Self {
            Self { rows, cols }
        }

        /// Item rows left after the status line and its spacer.
        pub fn visible_rows(&self) -> usize {
            (self.rows as usize).saturating_sub(2).max(1)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Span {
        pub text: String,
        pub highlighted: bool,
    }

    impl Span {
        pub fn new(text: impl Into<String>, highlighted: bool) -> Self {
            Self {
                text: text.into(),
                highlighted,
            }
        }

        pub fn plain(text: impl Into<String>) -> Self {
            Self::new(text, false)
        }
    }

    /// One visible task.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ItemRow {
        pub index: usize,
        pub selected: bool,
        pub completed: bool,
        pub text: String,
        /// Cursor offset, only for the selected row in TextEdit.
        pub cursor: Option<usize>,
        pub deadline: NaiveDate,
        /// Field under adjustment, only for the selected row in DateEdit.
        pub active_field: Option<DateField>,
    }

    impl ItemRow {
        fn new(index: usize, item: &TaskItem, state: &EditorState) -> Self {
            let selected = index == state.selected;
            Self {
                index,
                selected,
                completed: item.completed,
                text: item.text.clone(),
                cursor: (selected && state.mode == Mode::TextEdit)
                    .then(|| state.cursor.min(item.char_len())),
                deadline: item.deadline,
                active_field: (selected && state.mode == Mode::DateEdit).then_some(state.date_field),
            }
        }

        /// Text with the cursor marker inserted when editing.
        pub fn display_text(&self) -> String {
            match self.cursor {
                Some(col) => {
                    let mut out: String = self.text.chars().take(col).collect();
                    out.push(CURSOR_MARKER);
                    out.extend(self.text.chars().skip(col));
                    out
                }
                None => self.text.clone(),
            }
        }

        /// Flattens the row into spans. The selected row is highlighted; inside it the active
        /// date field is drawn inverted so it stands out.
        pub fn spans(&self, text_width: usize) -> Vec<Span> {
            let hl = self.selected;
            let marker = if self.completed {
                COMPLETED_MARKER
            } else {
                OPEN_MARKER
            };
            let shown = self.display_text();
            let pad = text_width.saturating_sub(shown.chars().count());

            let mut spans = vec![
                Span::new(marker, hl),
                Span::new(format!("{}{}", shown, " ".repeat(pad)), hl),
                Span::new(" [", hl),
            ];
            match self.active_field {
                None => spans.push(Span::new(date::format_date(self.deadline), hl)),
                Some(active) => {
                    let parts = [
                        format!("{:02}", self.deadline.day()),
                        format!("{:02}", self.deadline.month()),
                        format!("{:04}", self.deadline.year()),
                    ];
                    for (field, part) in DateField::ALL.into_iter().zip(parts) {
                        if field != DateField::Day {
                            spans.push(Span::new(".", hl));
                        }
                        spans.push(Span::new(part, hl != (field == active)));
                    }
                }
            }
            spans.push(Span::new("]", hl));
            spans
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum FrameRow {
        Item(ItemRow),
        /// Past the end of the list.
        Filler,
    }

    impl FrameRow {
        pub fn spans(&self, text_width: usize) -> Vec<Span> {
            match self {
                FrameRow::Item(row) => row.spans(text_width),
                FrameRow::Filler => vec![Span::plain(FILLER)],
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Frame {
        pub rows: Vec<FrameRow>,
        pub status: String,
        /// Layout width in columns.
        pub width: usize,
        pub text_width: usize,
        pub show_cursor: bool,
        /// Screen cell of the cursor marker, `(col, row)`, while editing text.
        pub cursor_cell: Option<(u16, u16)>,
    }

    impl Frame {
        /// All screen lines, status line last, separated by one blank line.
        pub fn lines(&self) -> Vec<Vec<Span>> {
            let mut lines: Vec<Vec<Span>> = self
                .rows
                .iter()
                .map(|row| row.spans(self.text_width))
                .collect();
            lines.push(Vec::new());
            lines.push(self.status_spans());
            lines
        }

        pub fn status_spans(&self) -> Vec<Span> {
            let pad = self.width.saturating_sub(self.status.chars().count());
            vec![Span::new(
                format!("{}{}", self.status, " ".repeat(pad)),
                true,
            )]
        }

        /// Plain-text rendering with highlighting dropped.
        pub fn to_plain_text(&self) -> String {
            self.lines()
                .iter()
                .map(|line| line.iter().map(|span| span.text.as_str()).collect::<String>())
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    /// Builds the display model and updates the cached scroll offset so the selection is
    /// always on screen.
    pub fn project(items: &ItemList, state: &mut EditorState, viewport: Viewport) -> Frame {
        state.viewport_cols = viewport.cols;
        let visible = viewport.visible_rows();
        state.scroll = scroll_offset(state.selected, state.scroll, visible);

        let width = state.width_override.unwrap_or(viewport.cols) as usize;
        let text_width = width.saturating_sub(DATE_COLUMN + ROW_CHROME);

        let rows: Vec<FrameRow> = (state.scroll..state.scroll + visible)
            .map(|index| match items.get(index) {
                Some(item) => FrameRow::Item(ItemRow::new(index, item, state)),
                None => FrameRow::Filler,
            })
            .collect();

        let cursor_cell = rows.iter().enumerate().find_map(|(y, row)| match row {
            FrameRow::Item(ItemRow {
                cursor: Some(col), ..
            }) => Some(((OPEN_MARKER.chars().count() + col) as u16, y as u16)),
            _ => None,
        });

        Frame {
            rows,
            status: status_text(items, state),
            width,
            text_width,
            show_cursor: state.mode == Mode::TextEdit,
            cursor_cell,
        }
    }

    /// Scroll up to the selection when it is above the window; scroll down just enough to
    /// make it the last visible row when it is below.
    pub fn scroll_offset(selected: usize, scroll: usize, visible: usize) -> usize {
        if selected < scroll {
            selected
        } else if selected >= scroll + visible {
            selected + 1 - visible
        } else {
            scroll
        }
    }

    pub fn status_text(items: &ItemList, state: &EditorState) -> String {
        let autosave = if state.autosave { "ON" } else { "OFF" };
        let mut status = match state.mode {
            Mode::DateEdit => format!(
                " {} - {} | Edit: {} | Auto-save: {}",
                state.mode.as_str(),
                state.filename,
                state.date_field.as_str(),
                autosave
            ),
            mode => {
                let line = if items.is_empty() { 0 } else { state.selected + 1 };
                format!(
                    " {} - {} | Line {}/{} | Auto-save: {}",
                    mode.as_str(),
                    state.filename,
                    line,
                    items.len(),
                    autosave
                )
            }
        };
        if let Some(message) = &state.status_message {
            status.push_str(" | ");
            status.push_str(message);
        }
        status
    }

}

pub mod parser {
    //! Reader for the line-per-task file format: `[D ]<text> | <DD.MM.YYYY>`.
    //!
    //! Parsing never fails. A line without a readable date suffix becomes text in full and
    //! gets the supplied fallback date.

    use crate::core::{ItemList, MAX_ITEMS, MAX_TEXT_CHARS, TaskItem, truncate_chars};
    use crate::date::parse_date;
    use chrono::NaiveDate;
    use nom::{IResult, bytes::complete::tag, combinator::opt};

    pub const COMPLETED_PREFIX: &str = "D ";
    pub const DATE_SEPARATOR: &str = " | ";

    /// Result of reading a whole file.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParsedList {
        pub items: ItemList,
        /// Lines beyond `MAX_ITEMS` that were not read.
        pub skipped: usize,
    }

    pub fn parse_list_from_str(input: &str, today: NaiveDate) -> ParsedList {
        let mut items = Vec::new();
        let mut skipped = 0;
        for line in input.lines() {
            if items.len() < MAX_ITEMS {
                items.push(parse_line(line, today));
            } else {
                skipped += 1;
            }
        }
        ParsedList {
            items: items.into(),
            skipped,
        }
    }

    /// The date suffix is split off first; the completion prefix is only looked for in the
    /// remaining text.
    pub fn parse_line(line: &str, today: NaiveDate) -> TaskItem {
        let (head, deadline) = split_deadline(line).unwrap_or((line, today));
        let (text, marker) = match completion_marker(head) {
            Ok(parsed) => parsed,
            Err(_) => (head, None),
        };
        TaskItem {
            text: truncate_chars(text.to_string(), MAX_TEXT_CHARS),
            deadline,
            completed: marker.is_some(),
        }
    }

    fn completion_marker(i: &str) -> IResult<&str, Option<&str>> {
        opt(tag(COMPLETED_PREFIX))(i)
    }

    /// Splits at the last separator; only a suffix made of exactly one date counts.
    fn split_deadline(rest: &str) -> Option<(&str, NaiveDate)> {
        let at = rest.rfind(DATE_SEPARATOR)?;
        let date = parse_date(&rest[at + DATE_SEPARATOR.len()..]).ok()?;
        Some((&rest[..at], date))
    }

}

pub mod format {
    //! Writer for the line-per-task file format.

    use crate::core::{ItemList, TaskItem};
    use crate::date::format_date;
    use crate::parser::{COMPLETED_PREFIX, DATE_SEPARATOR};

    pub fn format_item(item: &TaskItem) -> String {
        let prefix = if item.completed { COMPLETED_PREFIX } else { "" };
        format!(
            "{}{}{}{}",
            prefix,
            item.text,
            DATE_SEPARATOR,
            format_date(item.deadline)
        )
    }

    /// One line per item, each newline-terminated.
    pub fn format_list(items: &ItemList) -> String {
        let mut out = String::new();
        for item in items {
            out.push_str(&format_item(item));
            out.push('\n');
        }
        out
    }

}

pub mod storage {
    //! Persistence collaborator. A save is a synchronous full overwrite of the file.

    use crate::core::ItemList;
    use crate::date::today;
    use crate::format::format_list;
    use crate::parser::parse_list_from_str;
    use anyhow::{Context, Result};
    use log::{info, warn};
    use std::{
        fs,
        io::ErrorKind,
        path::{Path, PathBuf},
    };

    /// Loads and stores the ordered task list.
    pub trait TaskRepository {
        /// A missing or empty store yields the default single-item list.
        fn load(&self) -> Result<ItemList>;
        fn save(&self, items: &ItemList) -> Result<()>;
    }

    /// Plain text file, one task per line.
    #[derive(Debug, Clone)]
    pub struct FileRepository {
        path: PathBuf,
    }

    impl FileRepository {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl TaskRepository for FileRepository {
        fn load(&self) -> Result<ItemList> {
            let bytes = match fs::read(&self.path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    info!(
                        "event=load module=storage status=seeded reason=missing path={}",
                        self.path.display()
                    );
                    return Ok(ItemList::with_default_item(today()));
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("reading {:?}", self.path));
                }
            };

            let text = String::from_utf8_lossy(&bytes);
            let parsed = parse_list_from_str(&text, today());
            if parsed.skipped > 0 {
                warn!(
                    "event=load module=storage status=truncated skipped_lines={} path={}",
                    parsed.skipped,
                    self.path.display()
                );
            }
            if parsed.items.is_empty() {
                info!(
                    "event=load module=storage status=seeded reason=empty path={}",
                    self.path.display()
                );
                return Ok(ItemList::with_default_item(today()));
            }
            info!(
                "event=load module=storage status=ok items={} path={}",
                parsed.items.len(),
                self.path.display()
            );
            Ok(parsed.items)
        }

        fn save(&self, items: &ItemList) -> Result<()> {
            fs::write(&self.path, format_list(items).as_bytes())
                .with_context(|| format!("writing {:?}", self.path))?;
            info!(
                "event=save module=storage status=ok items={} path={}",
                items.len(),
                self.path.display()
            );
            Ok(())
        }
    }

}

pub mod terminal {
    //! Terminal collaborator: blocking key reads, viewport size and frame drawing.

    use crate::editor::Key;
    use crate::render::{Frame, Viewport};
    use anyhow::{Context, Result};
    use crossterm::{
        cursor::{Hide, MoveTo, Show},
        event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
        execute, queue,
        style::{Attribute, Print, SetAttribute},
        terminal::{
            self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
            LeaveAlternateScreen,
        },
    };
    use std::io::{self, Stdout, Write};

    pub trait Terminal {
        /// Blocks until a key the editor understands arrives.
        fn read_key(&mut self) -> Result<Key>;
        fn viewport_size(&mut self) -> Result<Viewport>;
        fn draw(&mut self, frame: &Frame) -> Result<()>;
    }

    /// Maps a crossterm key event to an editor key; releases and unknown keys map to `None`.
    pub fn classify_key(event: KeyEvent) -> Option<Key> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        if event.modifiers.contains(KeyModifiers::CONTROL)
            && !event.modifiers.contains(KeyModifiers::ALT)
        {
            return match event.code {
                KeyCode::Char('c') => Some(Key::Interrupt),
                _ => None,
            };
        }
        match event.code {
            KeyCode::Char(ch) => Some(Key::Char(ch)),
            KeyCode::Enter => Some(Key::Enter),
            KeyCode::Esc => Some(Key::Escape),
            KeyCode::Backspace => Some(Key::Backspace),
            KeyCode::Delete => Some(Key::Delete),
            KeyCode::Up => Some(Key::Up),
            KeyCode::Down => Some(Key::Down),
            KeyCode::Left => Some(Key::Left),
            KeyCode::Right => Some(Key::Right),
            _ => None,
        }
    }

    /// Raw-mode terminal on stdout. The alternate screen is left again on drop.
    pub struct CrosstermTerminal {
        out: Stdout,
    }

    impl CrosstermTerminal {
        pub fn enter() -> Result<Self> {
            terminal::enable_raw_mode().context("enabling raw mode")?;
            let mut out = io::stdout();
            execute!(out, EnterAlternateScreen, DisableLineWrap, Hide)
                .context("entering alternate screen")?;
            Ok(Self { out })
        }
    }

    impl Drop for CrosstermTerminal {
        fn drop(&mut self) {
            let _ = execute!(self.out, Show, EnableLineWrap, LeaveAlternateScreen);
            let _ = terminal::disable_raw_mode();
        }
    }

    impl Terminal for CrosstermTerminal {
        fn read_key(&mut self) -> Result<Key> {
            loop {
                if let Event::Key(key_event) = event::read().context("reading terminal event")? {
                    if let Some(key) = classify_key(key_event) {
                        return Ok(key);
                    }
                }
            }
        }

        fn viewport_size(&mut self) -> Result<Viewport> {
            let (cols, rows) = terminal::size().context("querying terminal size")?;
            Ok(Viewport::new(rows, cols))
        }

        fn draw(&mut self, frame: &Frame) -> Result<()> {
            queue!(self.out, Hide)?;
            for (y, line) in frame.lines().iter().enumerate() {
                queue!(self.out, MoveTo(0, y as u16))?;
                for span in line {
                    if span.highlighted {
                        queue!(
                            self.out,
                            SetAttribute(Attribute::Reverse),
                            Print(&span.text),
                            SetAttribute(Attribute::NoReverse)
                        )?;
                    } else {
                        queue!(self.out, Print(&span.text))?;
                    }
                }
                queue!(self.out, Clear(ClearType::UntilNewLine))?;
            }
            queue!(self.out, Clear(ClearType::FromCursorDown))?;
            if let (true, Some((col, row))) = (frame.show_cursor, frame.cursor_cell) {
                queue!(self.out, MoveTo(col, row), Show)?;
            }
            self.out.flush().context("flushing terminal output")?;
            Ok(())
        }
    }

}

pub mod app {
    //! The render → read key → dispatch loop.

    use crate::editor::{Editor, Outcome};
    use crate::storage::TaskRepository;
    use crate::terminal::Terminal;
    use anyhow::Result;
    use log::{info, warn};

    pub const SAVED_MESSAGE: &str = "File saved";

    /// Runs until the editor asks to quit. Only terminal failures end the loop early; a
    /// failed save is reported in the status line and retried on the next commit.
    pub fn run<T, R>(editor: &mut Editor, terminal: &mut T, repository: &R) -> Result<()>
    where
        T: Terminal,
        R: TaskRepository,
    {
        loop {
            let viewport = terminal.viewport_size()?;
            let frame = editor.frame(viewport);
            terminal.draw(&frame)?;

            let key = terminal.read_key()?;
            match editor.apply_key(key) {
                Outcome::Quit => {
                    info!(
                        "event=quit module=app items={}",
                        editor.items().len()
                    );
                    return Ok(());
                }
                Outcome::Persist => persist(editor, repository, false),
                Outcome::Save => persist(editor, repository, true),
                Outcome::Changed | Outcome::Unchanged => {}
            }
        }
    }

    fn persist<R: TaskRepository>(editor: &mut Editor, repository: &R, explicit: bool) {
        match repository.save(editor.items()) {
            Ok(()) => {
                if explicit {
                    editor.set_status_message(SAVED_MESSAGE);
                }
            }
            Err(err) => {
                warn!(
                    "event=save module=app status=error explicit={} error={:#}",
                    explicit, err
                );
                editor.set_status_message(format!("Save failed: {err:#}"));
            }
        }
    }

}

pub mod logging {
    //! File logging bootstrap.
    //!
    //! The terminal belongs to the full-screen UI, so log records go to rotating files.
    //! Initialisation happens at most once per process; a second call with the same
    //! directory is accepted, a different directory is rejected.

    use anyhow::{Context, Result, bail};
    use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
    use log::info;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;

    const LOG_FILE_BASENAME: &str = "todolist";
    const MAX_LOG_FILE_SIZE_BYTES: u64 = 1024 * 1024;
    const MAX_LOG_FILES: usize = 3;

    static LOGGING_STATE: OnceLock<LoggingState> = OnceLock::new();

    struct LoggingState {
        level: &'static str,
        log_dir: PathBuf,
        _logger: LoggerHandle,
    }

    /// `debug` with `--verbose`, `info` otherwise.
    pub fn level_for(verbose: bool) -> &'static str {
        if verbose { "debug" } else { "info" }
    }

    pub fn init_logging(level: &str, log_dir: &Path) -> Result<()> {
        let level = normalize_level(level)?;

        if let Some(state) = LOGGING_STATE.get() {
            if state.log_dir != log_dir {
                bail!(
                    "logging already initialized at `{}`; refusing to switch to `{}`",
                    state.log_dir.display(),
                    log_dir.display()
                );
            }
            return Ok(());
        }

        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {:?}", log_dir))?;
        let logger = Logger::try_with_str(level)
            .with_context(|| format!("invalid log level `{level}`"))?
            .log_to_file(
                FileSpec::default()
                    .directory(log_dir)
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::Direct)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .context("starting file logger")?;

        info!(
            "event=app_start module=logging status=ok level={} log_dir={} version={}",
            level,
            log_dir.display(),
            env!("CARGO_PKG_VERSION")
        );

        let _ = LOGGING_STATE.set(LoggingState {
            level,
            log_dir: log_dir.to_path_buf(),
            _logger: logger,
        });
        Ok(())
    }

    /// `(level, log_dir)` once logging is active.
    pub fn logging_status() -> Option<(&'static str, PathBuf)> {
        LOGGING_STATE
            .get()
            .map(|state| (state.level, state.log_dir.clone()))
    }

    fn normalize_level(level: &str) -> Result<&'static str> {
        match level.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok("trace"),
            "debug" => Ok("debug"),
            "info" => Ok("info"),
            "warn" | "warning" => Ok("warn"),
            "error" => Ok("error"),
            other => bail!("unsupported log level `{other}`; expected trace|debug|info|warn|error"),
        }
    }

}

pub mod config {
    //! Runtime configuration, assembled from the command line.

    use std::path::PathBuf;

    pub const DEFAULT_FILE: &str = "todo.txt";

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Config {
        pub path: PathBuf,
        pub autosave: bool,
        pub log_level: &'static str,
        /// File logging is off without a directory.
        pub log_dir: Option<PathBuf>,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                path: PathBuf::from(DEFAULT_FILE),
                autosave: true,
                log_level: crate::logging::level_for(false),
                log_dir: None,
            }
        }
    }

    impl Config {
        /// Label for the status line.
        pub fn display_name(&self) -> String {
            self.path.display().to_string()
        }
    }
}

pub use crate::app::run;
pub use crate::config::Config;
pub use crate::core::{EditError, ItemList, TaskItem};
pub use crate::date::{DateError, DateField};
pub use crate::editor::{Editor, EditorState, Key, Mode, Outcome};
pub use crate::format::format_list;
pub use crate::parser::parse_list_from_str;
pub use crate::render::{Frame, Viewport};
pub use crate::storage::{FileRepository, TaskRepository};
pub use crate::terminal::{CrosstermTerminal, Terminal};
