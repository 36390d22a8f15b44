//! nerdcan TUI

use nerdcan::{
    BusEvent, Config, Direction, FilterMode, FilterSet, Monitor, MonitorEvent,
    OutgoingMessageSpec, Transport, transport::LoopbackTransport,
};

use clap::Parser;
use cli_log::*;
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod form;
mod popup;
mod storage;
use form::{FormAction, MessageForm};
use popup::Popup;

use ratatui::{
    DefaultTerminal, Frame,
    crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Clear, Gauge, Paragraph, Row, Table, TableState},
};

#[cfg(feature = "socketcan")]
use nerdcan_io::socketcan::SocketCanTransport;

use std::error::Error;

/// Rows kept in log mode
const LOG_LIMIT: usize = 1000;

enum AppEvent {
    Bus(MonitorEvent),
    Key(KeyEvent),
}

fn main() -> Result<(), Box<dyn Error>> {
    init_cli_log!();
    let mut app = App::new()?;
    let terminal = ratatui::init();
    let result = app.run(terminal);

    ratatui::restore();

    result
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// CAN interface
    #[arg(short, long, default_value = "can0")]
    device: String,

    /// Bit rate used when the interface doesn't report one
    #[arg(short, long, default_value = "500000")]
    baud: u32,

    /// Use an in-process loopback bus instead of the interface
    #[arg(long)]
    loopback: bool,

    /// File holding the outgoing messages
    #[arg(short, long, default_value = "messages.json")]
    messages: PathBuf,

    /// Extra outgoing message, as ID#DATA[@PERIOD_MS]
    #[arg(short, long)]
    send: Vec<String>,

    /// Don't use colors
    #[arg(short, long)]
    no_color: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Focus {
    Receive,
    Send,
}

struct App {
    cli: Args,
    events: mpsc::Receiver<AppEvent>,
    monitor: Monitor,
    started: Instant,
    log: VecDeque<BusEvent>,
    overwrite: bool,
    follow: bool,
    focus: Focus,
    receive_state: TableState,
    send_state: TableState,
    idle: bool,
    show_help: bool,
    form: Option<MessageForm>,
    detail: Option<u32>,
    status: Option<String>,
}

impl App {
    fn new() -> Result<Self, Box<dyn Error>> {
        let args = Args::parse();
        let started = Instant::now();

        let (transport, status) = App::open_transport(&args);
        let config = Config::default()
            .interface(transport.name())
            .bitrate(transport.baud());
        let (monitor, bus_events) = Monitor::start(transport, config)?;

        let mut specs = storage::load(&args.messages).unwrap_or_else(|e| {
            warn!("can't load {}: {}", args.messages.display(), e);
            vec![]
        });
        for text in args.send.iter() {
            specs.push(App::parse_send(text)?);
        }
        monitor.replace_specs(specs)?;

        let (tx_events, rx_events) = mpsc::channel::<AppEvent>();

        // thread for user input events
        thread::spawn({
            let tx = tx_events.clone();
            move || loop {
                if let Ok(Event::Key(key)) = event::read() {
                    if tx.send(AppEvent::Key(key)).is_err() {
                        break;
                    }
                }
            }
        });

        // thread for bus events
        thread::spawn({
            let tx = tx_events;
            move || {
                while let Ok(event) = bus_events.recv() {
                    if tx.send(AppEvent::Bus(event)).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            cli: args,
            events: rx_events,
            monitor,
            started,
            log: VecDeque::new(),
            overwrite: true,
            follow: true,
            focus: Focus::Receive,
            receive_state: TableState::default().with_selected(0),
            send_state: TableState::default().with_selected(0),
            idle: false,
            show_help: false,
            form: None,
            detail: None,
            status,
        })
    }

    /// Falls back to a loopback bus when the interface can't be opened
    fn open_transport(args: &Args) -> (Arc<dyn Transport>, Option<String>) {
        let loopback: Arc<dyn Transport> = Arc::new(
            LoopbackTransport::new("loopback", args.baud).with_echo(true),
        );
        if args.loopback {
            return (loopback, None);
        }

        #[cfg(feature = "socketcan")]
        let opened = SocketCanTransport::open(&args.device, args.baud)
            .map(|t| Arc::new(t) as Arc<dyn Transport>);

        #[cfg(not(feature = "socketcan"))]
        let opened: Result<Arc<dyn Transport>, nerdcan::Error> =
            Err(nerdcan::Error::TransportUnavailable {
                interface: args.device.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "built without SocketCAN support",
                ),
            });

        match opened {
            Ok(transport) => (transport, None),
            Err(e) => {
                error!("{}", e);
                (loopback, Some(format!("{}, using loopback", e)))
            }
        }
    }

    /// Parse an ID#DATA[@PERIOD_MS] specifier, e.g. 18FF0001#DEADBEEF@100
    fn parse_send(text: &str) -> Result<OutgoingMessageSpec, Box<dyn Error>> {
        let re = Regex::new(
            r"^([0-9A-Fa-f]{1,8})#((?:[0-9A-Fa-f]{2})*)(?:@(\d+))?$",
        )?;
        let c = re
            .captures(text.trim())
            .ok_or_else(|| format!("invalid message {:?}", text))?;

        let identifier = u32::from_str_radix(&c[1], 16)?;
        let data = &c[2];
        let payload = (0..data.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&data[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()?;
        let period = match c.get(3) {
            Some(m) => m.as_str().parse::<u64>()?,
            None => 0,
        };

        let spec = OutgoingMessageSpec::new(
            identifier,
            &payload,
            Duration::from_millis(period),
        );
        spec.validate()?;
        Ok(spec)
    }

    fn run(
        &mut self,
        mut terminal: DefaultTerminal,
    ) -> Result<(), Box<dyn Error>> {
        let draw_interval = Duration::from_millis(20);
        let idle_interval = Duration::from_millis(250);
        let mut draw_time: Instant = Instant::now() - draw_interval;

        loop {
            let now = Instant::now();
            if !self.idle && now - draw_time >= draw_interval {
                terminal.draw(|frame| self.draw(frame))?;
                draw_time = now;
                self.idle = true;
            }

            let timeout = if self.idle {
                idle_interval
            } else {
                draw_interval.saturating_sub(now - draw_time)
            };

            match self.events.recv_timeout(timeout) {
                Ok(AppEvent::Bus(MonitorEvent::Bus(event))) => {
                    self.bus_event(event);
                    self.idle = false;
                }
                Ok(AppEvent::Bus(MonitorEvent::Fault(e))) => {
                    self.status = Some(e.to_string());
                    self.idle = false;
                }
                // user input
                Ok(AppEvent::Key(key)) => {
                    self.idle = false;
                    if !self.key(key) {
                        break;
                    }
                }
                // health figures move without bus traffic
                Err(RecvTimeoutError::Timeout) => {
                    if self.monitor.is_health_open() {
                        self.idle = false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn bus_event(&mut self, event: BusEvent) {
        if !event.is_log_row() {
            return;
        }
        self.log.push_back(event);
        if self.log.len() > LOG_LIMIT {
            let _ = self.log.pop_front();
        }
        if !self.overwrite && self.follow {
            self.receive_state.select(Some(self.log.len() - 1));
        }
    }

    /// Returns false to quit
    fn key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        self.status = None;

        if let Some(form) = self.form.as_mut() {
            match form.key(key) {
                FormAction::Submit => self.submit_form(),
                FormAction::Cancel => self.form = None,
                FormAction::Continue => {}
            }
            return true;
        }

        match key.code {
            KeyCode::Char('q') => return false,
            KeyCode::Char('c') if ctrl => return false,
            KeyCode::Char('s') if ctrl => self.save(),
            KeyCode::Char('l') if ctrl => self.load(),
            KeyCode::Char('d') if ctrl => {
                self.monitor.clear_specs();
                self.save();
            }
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Char('o') => {
                self.overwrite = !self.overwrite;
                self.follow = true;
                self.receive_state.select(Some(0));
            }
            KeyCode::Char('f') => {
                self.monitor.cycle_filter_mode();
                self.log.clear();
            }
            KeyCode::Char('F') => {
                if let Some(id) = self.selected_identifier() {
                    self.monitor.toggle_filter_id(id);
                }
            }
            KeyCode::Char('i') => self.toggle_health(),
            KeyCode::Char('n') => {
                self.form = Some(match self.focus {
                    Focus::Receive => self
                        .selected_event()
                        .map(|event| MessageForm::from_event(&event))
                        .unwrap_or_default(),
                    Focus::Send => MessageForm::default(),
                });
            }
            KeyCode::Char('e') => {
                if self.focus == Focus::Send {
                    if let Some(spec) = self.selected_spec() {
                        self.form = Some(MessageForm::edit(&spec));
                    }
                }
            }
            KeyCode::Char('d') => {
                self.detail = match self.detail {
                    Some(_) => None,
                    None => self.selected_identifier(),
                };
            }
            KeyCode::Char(' ') => self.trigger_selected(),
            KeyCode::Delete | KeyCode::Backspace => self.remove_selected(),
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Receive => Focus::Send,
                    Focus::Send => Focus::Receive,
                };
            }
            KeyCode::Esc => self.escape(),
            KeyCode::Up => self.update_selection(-1),
            KeyCode::Down => self.update_selection(1),
            KeyCode::PageUp => self.update_selection(-10),
            KeyCode::PageDown => self.update_selection(10),
            _ => {}
        }
        true
    }

    /// Close the topmost popup, or reset the session when none is open
    fn escape(&mut self) {
        if self.show_help {
            self.show_help = false;
        } else if self.detail.is_some() {
            self.detail = None;
        } else if self.monitor.is_health_open() {
            self.monitor.close_health();
        } else {
            self.monitor.reset();
            self.log.clear();
            self.receive_state.select(Some(0));
        }
    }

    fn toggle_health(&mut self) {
        if self.monitor.is_health_open() {
            self.monitor.close_health();
        } else if let Err(e) = self.monitor.open_health() {
            self.status = Some(e.to_string());
        }
    }

    fn save(&mut self) {
        let specs = self.monitor.list_specs();
        self.status = Some(match storage::save(&self.cli.messages, &specs) {
            Ok(()) => format!("saved {} messages", specs.len()),
            Err(e) => format!("save failed: {}", e),
        });
    }

    fn load(&mut self) {
        let result = storage::load(&self.cli.messages)
            .map_err(|e| e.to_string())
            .and_then(|specs| {
                let count = specs.len();
                self.monitor
                    .replace_specs(specs)
                    .map(|_| count)
                    .map_err(|e| e.to_string())
            });
        self.status = Some(match result {
            Ok(count) => format!("loaded {} messages", count),
            Err(e) => format!("load failed: {}", e),
        });
        self.send_state.select(Some(0));
    }

    fn selected_spec(&self) -> Option<OutgoingMessageSpec> {
        let index = self.send_state.selected()?;
        self.monitor.list_specs().into_iter().nth(index)
    }

    fn trigger_selected(&mut self) {
        if self.focus != Focus::Send {
            return;
        }
        if let Some(spec) = self.selected_spec() {
            if let Err(e) = self.monitor.trigger(spec.id) {
                self.status = Some(e.to_string());
            }
        }
    }

    fn remove_selected(&mut self) {
        if self.focus != Focus::Send {
            return;
        }
        if let Some(spec) = self.selected_spec() {
            self.monitor.remove_spec(spec.id);
            self.save();
            self.update_selection(0);
        }
    }

    fn receive_rows(&self) -> Vec<BusEvent> {
        if self.overwrite {
            let filter = self.monitor.filter();
            self.monitor
                .latest()
                .into_iter()
                .map(|m| m.current)
                .filter(|e| filter.is_visible(e.id()))
                .collect()
        } else {
            self.log.iter().cloned().collect()
        }
    }

    fn selected_event(&self) -> Option<BusEvent> {
        let index = self.receive_state.selected()?;
        self.receive_rows().into_iter().nth(index)
    }

    fn selected_identifier(&self) -> Option<u32> {
        self.selected_event().map(|e| e.id())
    }

    /// Store the form's message; on error the form stays open.
    fn submit_form(&mut self) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let stored = form.to_spec().and_then(|spec| {
            self.monitor.upsert_spec(spec).map_err(|e| e.to_string())
        });
        match stored {
            Ok(()) => {
                self.form = None;
                self.save();
            }
            Err(e) => self.status = Some(e),
        }
    }

    fn update_selection(&mut self, by: i32) {
        let max = match self.focus {
            Focus::Receive => self.receive_rows().len(),
            Focus::Send => self.monitor.list_specs().len(),
        };
        let state = match self.focus {
            Focus::Receive => &mut self.receive_state,
            Focus::Send => &mut self.send_state,
        };
        let current = state.selected().unwrap_or(0) as i32;
        let max = max as i32;
        if max > 0 {
            let new = (current + by).clamp(0, max - 1);
            state.select(Some(new as usize));
            if self.focus == Focus::Receive {
                self.follow = new == max - 1;
            }
        }
    }

    fn color(&self, color: Color) -> Color {
        if self.cli.no_color { Color::White } else { color }
    }

    fn pane_block(&self, title: String, focus: Focus) -> Block<'static> {
        let style = if self.focus == focus {
            Style::new().fg(self.color(Color::Green))
        } else {
            Style::new().fg(Color::Gray)
        };
        Block::bordered().border_style(style).title(title)
    }

    fn event_row(&self, event: &BusEvent, filter: &FilterSet) -> Row<'static> {
        let marker = if filter.contains(event.id()) { "•" } else { " " };
        let (arrow, color) = match event.direction {
            Direction::Received => ("▼", Color::Reset),
            Direction::Transmitted => ("▲", Color::Yellow),
        };
        let cycle = if event.cycle_time.is_zero() {
            String::new()
        } else {
            format!("{:.1}ms", event.cycle_time.as_secs_f64() * 1000.0)
        };
        let time = event.time.saturating_duration_since(self.started);

        Row::new(vec![
            format!("{}{}", marker, arrow),
            event.packet.id_string(),
            event.packet.bytes.len().to_string(),
            cycle,
            event.packet.data_string(),
            format!("{:.3}", time.as_secs_f64()),
        ])
        .style(Style::new().fg(self.color(color)))
    }

    fn draw_receive(&mut self, frame: &mut Frame, area: Rect) {
        let selected_style = Style::default().add_modifier(Modifier::REVERSED);
        let filter = self.monitor.filter();
        let rows: Vec<Row> = self
            .receive_rows()
            .iter()
            .map(|event| self.event_row(event, &filter))
            .collect();

        let mode = if self.overwrite { "Overwrite" } else { "Log" };
        let title = format!(" Receive ({}, o=mode f/F=filter) ", mode);
        let cols = [
            Constraint::Length(3),
            Constraint::Length(9),
            Constraint::Length(4),
            Constraint::Length(10),
            Constraint::Fill(1),
            Constraint::Length(12),
        ];
        let header = Row::new(["", "ID", "DLC", "Cycle", "Data", "Time"])
            .style(Style::new().bold());

        let table = Table::new(rows, cols)
            .header(header)
            .row_highlight_style(selected_style)
            .block(self.pane_block(title, Focus::Receive));

        frame.render_stateful_widget(table, area, &mut self.receive_state);
    }

    fn draw_send(&mut self, frame: &mut Frame, area: Rect) {
        let selected_style = Style::default().add_modifier(Modifier::REVERSED);
        let active_color = self.color(Color::Green);
        let rows: Vec<Row> = self
            .monitor
            .list_specs()
            .iter()
            .map(|spec| {
                let packet = spec.packet();
                let period = if spec.is_cyclic() {
                    format!("{}ms", spec.period.as_millis())
                } else {
                    String::new()
                };
                let trigger = spec.trigger.map(|t| t.name()).unwrap_or("");
                let active = if spec.active { "●" } else { " " };
                let row = Row::new(vec![
                    active.to_string(),
                    packet.id_string(),
                    spec.dlc().to_string(),
                    period,
                    packet.data_string(),
                    trigger.to_string(),
                ]);
                if spec.active {
                    row.style(Style::new().fg(active_color))
                } else {
                    row
                }
            })
            .collect();

        let cols = [
            Constraint::Length(2),
            Constraint::Length(9),
            Constraint::Length(4),
            Constraint::Length(10),
            Constraint::Fill(1),
            Constraint::Length(8),
        ];
        let header = Row::new(["", "ID", "DLC", "Cycle", "Data", "Trigger"])
            .style(Style::new().bold());

        let table = Table::new(rows, cols)
            .header(header)
            .row_highlight_style(selected_style)
            .block(self.pane_block(
                " Send (space=send/start/stop, del=remove) ".to_string(),
                Focus::Send,
            ));

        frame.render_stateful_widget(table, area, &mut self.send_state);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let filter = self.monitor.filter();
        let (frames, _) = self.monitor.totals();
        let mode = if self.overwrite { "OVERWRITE" } else { "LOG" };
        let mut spans = vec![
            Span::styled(format!(" {} ", mode), Style::new().reversed()),
            Span::raw(format!(
                " {} ids | {} frames | filter: {}",
                self.monitor.latest().len(),
                frames,
                filter.mode.name(),
            )),
        ];
        if filter.mode != FilterMode::Off {
            spans.push(Span::raw(format!(" ({})", filter.ids().count())));
        }
        frame.render_widget(Line::from(spans), area);

        if let Some(status) = &self.status {
            let line = Line::from(Span::styled(
                format!("{} ", status),
                Style::new().fg(self.color(Color::Red)),
            ))
            .alignment(Alignment::Right);
            frame.render_widget(line, area);
        }
    }

    fn draw_help(&self, frame: &mut Frame) {
        let area = Popup::area(frame.area(), 56, 26);
        let popup = Popup::default().title(" nerdcan Help ").content(
            r#"
RECEIVE
o = Toggle Overwrite/Log Mode
f = Cycle Filter Mode (off, whitelist, blacklist)
F = Add/Remove Selected ID in Filter
d = Show/Hide Message Detail

SEND
space = Send Once, or Start/Stop Cyclic Sending
n = New Message (from selected row when receiving)
e = Edit Selected Message
del = Remove Message
ctrl+s = Save Messages
ctrl+l = Load Messages
ctrl+d = Delete All Messages

GENERAL
tab = Switch Pane
i = Show/Hide Bus Health
esc = Close Popup, or Reset Session
q = Quit
"#,
        );
        frame.render_widget(popup, area);
    }

    fn draw_detail(&self, frame: &mut Frame, id: u32) {
        let Some(event) = self.monitor.latest_for(id) else {
            return;
        };
        let packet = &event.packet;
        let binary = packet
            .bytes
            .iter()
            .map(|b| format!("{:08b}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let text = format!(
            "ID: 0x{} | DLC: {} | Cycle: {:.1}ms\n\nData (Hex):\n{}\n\n\
             Data (Binary):\n{}",
            packet.id_string(),
            packet.bytes.len(),
            event.cycle_time.as_secs_f64() * 1000.0,
            packet.data_string(),
            binary,
        );
        let area = Popup::area(frame.area(), 60, 12);
        let popup = Popup::default()
            .title(" Message Detail ")
            .border_style(Style::new().fg(self.color(Color::Cyan)))
            .content(text);
        frame.render_widget(popup, area);
    }

    fn draw_health(&self, frame: &mut Frame) {
        let health = self.monitor.health();
        let area = Popup::area(frame.area(), 48, 10);
        let status_color = if health.status.is_error() {
            Color::Red
        } else {
            Color::Green
        };
        let block = Block::bordered()
            .border_style(Style::new().fg(self.color(status_color)))
            .title(format!(
                " {} @ {}bps ",
                health.interface,
                self.monitor.config().bitrate,
            ));
        frame.render_widget(Clear, area);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        if inner.height < 2 {
            return;
        }

        let bar_area = Rect::new(inner.x, inner.y, inner.width, 1u16);
        let percent = health.load_percent.clamp(0.0, 100.0) as u16;
        let gauge = Gauge::default()
            .style(Style::default().fg(self.color(Color::Blue)))
            .label(format!("~{:.1}% load", health.load_percent))
            .percent(percent);
        frame.render_widget(gauge, bar_area);

        let text_area =
            Rect::new(inner.x, inner.y + 1, inner.width, inner.height - 1);
        let text = format!(
            "\nStatus:       {}\nFrames/s:     {:.0}\nRX errors:    {}\n\
             TX errors:    {}\nError frames: {}",
            health.status.name(),
            health.frames_per_second,
            health.rx_errors,
            health.tx_errors,
            health.error_frames,
        );
        frame.render_widget(Paragraph::new(text), text_area);
    }

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();

        // top line
        let title = Line::from(vec![
            Span::raw(" ⚡︎ nerdcan ").bold(),
            Span::styled(
                env!("CARGO_PKG_VERSION"),
                Style::default().fg(self.color(Color::Green)),
            ),
            Span::raw(format!(
                "  {} @ {}bps",
                self.monitor.config().interface,
                self.monitor.config().bitrate,
            )),
        ]);
        frame.render_widget(&title, area);
        let hints = Line::from(vec![Span::styled(
            "(? for help, q to quit) ",
            Style::default().fg(Color::Gray),
        )])
        .alignment(Alignment::Right);
        frame.render_widget(&hints, area);

        let area = area.inner(Margin::new(0, 1));
        let send_height = (self.monitor.list_specs().len() as u16 + 3)
            .clamp(4, area.height / 2);
        let rows = Layout::vertical([
            Constraint::Fill(1),
            Constraint::Length(send_height),
        ])
        .split(area);

        self.draw_receive(frame, rows[0]);
        self.draw_send(frame, rows[1]);

        let bottom = frame.area().rows().last();
        if let Some(bottom) = bottom {
            self.draw_status(frame, bottom);
        }

        if self.monitor.is_health_open() {
            self.draw_health(frame);
        }
        if let Some(id) = self.detail {
            self.draw_detail(frame, id);
        }
        if let Some(form) = &self.form {
            let area = Popup::area(frame.area(), 48, 9);
            frame.render_widget(form.popup(self.color(Color::Green)), area);
        }
        if self.show_help {
            self.draw_help(frame);
        }
    }
}
