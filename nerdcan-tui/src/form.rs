//! Popup form for creating and editing outgoing messages.

use crate::popup::Popup;
use nerdcan::{BusEvent, OutgoingMessageSpec};
use ratatui::{
    crossterm::event::{KeyCode, KeyEvent},
    style::{Color, Style, Stylize},
    text::{Line, Span},
};
use std::time::Duration;
use uuid::Uuid;

const LABELS: [&str; 4] = ["ID (hex)", "DLC", "Cycle (ms)", "Data (hex)"];
const LIMITS: [usize; 4] = [8, 2, 6, 64 * 3];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormAction {
    Continue,
    Submit,
    Cancel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageForm {
    fields: [String; 4],
    focused: usize,
    editing: Option<Uuid>,
}

impl MessageForm {
    pub fn new(id: &str, dlc: &str, cycle: &str, data: &str) -> Self {
        Self {
            fields: [id, dlc, cycle, data].map(str::to_string),
            focused: 0,
            editing: None,
        }
    }

    /// New message pre-filled from a received row
    pub fn from_event(event: &BusEvent) -> Self {
        let cycle = if event.cycle_time.is_zero() {
            String::new()
        } else {
            event.cycle_time.as_millis().to_string()
        };
        Self::new(
            &format!("{:X}", event.packet.id),
            &event.packet.bytes.len().to_string(),
            &cycle,
            &event.packet.data_string(),
        )
    }

    /// Edit an existing message, keeping its identity
    pub fn edit(spec: &OutgoingMessageSpec) -> Self {
        let packet = spec.packet();
        Self {
            editing: Some(spec.id),
            ..Self::new(
                &format!("{:X}", spec.identifier),
                &spec.dlc().to_string(),
                &spec.period.as_millis().to_string(),
                &packet.data_string(),
            )
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn key(&mut self, key: KeyEvent) -> FormAction {
        match key.code {
            KeyCode::Esc => return FormAction::Cancel,
            KeyCode::Enter => return FormAction::Submit,
            KeyCode::Tab | KeyCode::Down => {
                self.focused = (self.focused + 1) % self.fields.len();
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.focused =
                    (self.focused + self.fields.len() - 1) % self.fields.len();
            }
            KeyCode::Backspace => {
                self.fields[self.focused].pop();
            }
            KeyCode::Char(c) if self.accepts(c) => {
                self.fields[self.focused].push(c.to_ascii_uppercase());
            }
            _ => {}
        }
        FormAction::Continue
    }

    fn accepts(&self, c: char) -> bool {
        if self.fields[self.focused].len() >= LIMITS[self.focused] {
            return false;
        }
        match self.focused {
            0 => c.is_ascii_hexdigit(),
            3 => c.is_ascii_hexdigit() || c == ' ',
            _ => c.is_ascii_digit(),
        }
    }

    /// Parse the fields. An empty DLC takes the data length; data is
    /// zero-padded or cut to the DLC. Range and length checks are left
    /// to the scheduler.
    pub fn to_spec(&self) -> Result<OutgoingMessageSpec, String> {
        let [id, dlc, cycle, data] = &self.fields;

        let id = id.trim().trim_start_matches("0x");
        let identifier = u32::from_str_radix(id, 16)
            .map_err(|_| format!("invalid identifier {:?}", id))?;

        let digits: String = data.split_whitespace().collect();
        if digits.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in {:?}", data));
        }
        let mut payload = (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| format!("invalid data: {}", e))?;

        if !dlc.trim().is_empty() {
            let dlc = dlc
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid DLC {:?}", dlc))?;
            payload.resize(dlc, 0);
        }

        let period = match cycle.trim() {
            "" => 0,
            ms => ms
                .parse::<u64>()
                .map_err(|_| format!("invalid cycle time {:?}", ms))?,
        };

        let mut spec = OutgoingMessageSpec::new(
            identifier,
            &payload,
            Duration::from_millis(period),
        );
        if let Some(id) = self.editing {
            spec.id = id;
        }
        Ok(spec)
    }

    pub fn popup(&self, color: Color) -> Popup<'static> {
        let mut lines = vec![Line::default()];
        for (index, (label, value)) in
            LABELS.iter().zip(self.fields.iter()).enumerate()
        {
            let focused = index == self.focused;
            let marker = if focused { "▸ " } else { "  " };
            let cursor = if focused { "_" } else { "" };
            let value = Span::raw(format!("{}{}", value, cursor));
            lines.push(Line::from(vec![
                Span::raw(format!("{}{:<12}", marker, label)),
                if focused { value.fg(color).bold() } else { value },
            ]));
        }
        lines.push(Line::default());
        lines.push(Line::from(" enter=save  tab=next field  esc=cancel").gray());

        let title = if self.is_editing() {
            " Edit Message "
        } else {
            " New Message "
        };
        Popup::default()
            .title(title)
            .border_style(Style::new().fg(color))
            .content(lines)
    }
}
