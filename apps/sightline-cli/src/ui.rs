use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use sightline_types::{
    events::{EventPayload, NotificationLevel, SystemEvent},
    session::SessionPhase,
};
use tokio::sync::mpsc::UnboundedSender;

const MAX_LOG_ENTRIES: usize = 120;

pub enum UiMessage {
    Event(SystemEvent),
    Notice(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    ToggleCamera,
    ToggleDetection,
    Quit,
}

pub fn run(
    receiver: Receiver<UiMessage>,
    commands: UnboundedSender<UiCommand>,
    summary: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, &commands, summary.as_str());

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    // Make sure the session side stops waiting on us.
    let _ = commands.send(UiCommand::Quit);
    res
}

#[derive(Debug)]
struct Dashboard {
    phase: SessionPhase,
    status: String,
    objects: Vec<String>,
    logs: VecDeque<String>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            status: String::from("waiting"),
            objects: Vec::new(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
        }
    }
}

impl Dashboard {
    fn apply(&mut self, event: &SystemEvent) {
        match &event.payload {
            EventPayload::Lifecycle(lifecycle) => {
                self.phase = lifecycle.phase;
                if lifecycle.phase != SessionPhase::Detecting {
                    self.objects.clear();
                }
            }
            EventPayload::Detection(detection) => {
                self.objects = detection.labels.clone();
            }
            _ => {}
        }
        self.status = summarize_status(event);
        self.push(format_event(event));
    }

    fn push(&mut self, line: String) {
        if self.logs.len() == MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    commands: &UnboundedSender<UiCommand>,
    summary: &str,
) -> Result<()> {
    let mut dashboard = Dashboard::default();

    loop {
        let mut should_close = false;
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Event(event)) => dashboard.apply(&event),
                Ok(UiMessage::Notice(text)) => dashboard.push(format!("! {text}")),
                Ok(UiMessage::Shutdown) => should_close = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    should_close = true;
                    break;
                }
            }
        }
        if should_close {
            break;
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints(
                    [
                        Constraint::Length(3),
                        Constraint::Length(3),
                        Constraint::Min(0),
                    ]
                    .as_ref(),
                )
                .split(f.size());

            let header = Paragraph::new(Line::from(vec![
                Span::styled(
                    phase_label(dashboard.phase),
                    Style::default()
                        .fg(phase_color(dashboard.phase))
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw("  "),
                Span::raw(dashboard.status.clone()),
                Span::raw("  "),
                Span::styled("backend:", Style::default().fg(Color::Magenta)),
                Span::raw(" "),
                Span::raw(summary),
            ]))
            .block(Block::default().borders(Borders::ALL).title("Sightline"));
            f.render_widget(header, chunks[0]);

            let keys = Paragraph::new(Line::from(vec![
                Span::styled("c", Style::default().fg(Color::Yellow)),
                Span::raw(" camera  "),
                Span::styled("d", Style::default().fg(Color::Yellow)),
                Span::raw(" live detection  "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw(" quit   "),
                Span::styled("objects:", Style::default().fg(Color::Cyan)),
                Span::raw(" "),
                Span::raw(if dashboard.objects.is_empty() {
                    "-".to_string()
                } else {
                    dashboard.objects.join(", ")
                }),
            ]))
            .block(Block::default().borders(Borders::ALL).title("Controls"));
            f.render_widget(keys, chunks[1]);

            let items: Vec<ListItem> = dashboard
                .logs
                .iter()
                .rev()
                .map(|entry| ListItem::new(entry.clone()))
                .collect();
            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title("Recent events"));
            f.render_widget(list, chunks[2]);
        })?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                let command = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => Some(UiCommand::Quit),
                    KeyCode::Char('c') => Some(UiCommand::ToggleCamera),
                    KeyCode::Char('d') => Some(UiCommand::ToggleDetection),
                    _ => None,
                };
                if let Some(command) = command {
                    if commands.send(command).is_err() || command == UiCommand::Quit {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "CAMERA OFF",
        SessionPhase::CameraActive => "CAMERA ON",
        SessionPhase::Detecting => "DETECTING",
    }
}

fn phase_color(phase: SessionPhase) -> Color {
    match phase {
        SessionPhase::Idle => Color::DarkGray,
        SessionPhase::CameraActive => Color::Cyan,
        SessionPhase::Detecting => Color::Green,
    }
}

fn summarize_status(event: &SystemEvent) -> String {
    match &event.payload {
        EventPayload::Lifecycle(lifecycle) => lifecycle
            .details
            .clone()
            .unwrap_or_else(|| format!("{:?}", lifecycle.phase)),
        EventPayload::Detection(detection) => match &detection.latency {
            Some(sample) => format!("{} object(s) in {}ms", detection.count, sample.total_ms),
            None => format!("{} object(s)", detection.count),
        },
        EventPayload::History(history) => format!("history: {} record(s)", history.records),
        EventPayload::Notification(note) => note.title.clone(),
    }
}

fn format_event(event: &SystemEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S");
    match &event.payload {
        EventPayload::Lifecycle(lifecycle) => format!(
            "[{}] {:?} {}",
            timestamp,
            lifecycle.phase,
            lifecycle.details.clone().unwrap_or_default()
        ),
        EventPayload::Detection(detection) => format!(
            "[{}] {} object(s) {}",
            timestamp,
            detection.count,
            detection.labels.join(", ")
        ),
        EventPayload::History(history) => {
            format!("[{}] history refreshed ({})", timestamp, history.records)
        }
        EventPayload::Notification(note) => {
            let level = match note.level {
                NotificationLevel::Info => "info",
                NotificationLevel::Error => "error",
            };
            format!("[{}] {} {}: {}", timestamp, level, note.title, note.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_types::events::{DetectionEvent, EventKind};

    #[test]
    fn dashboard_tracks_phase_and_objects() {
        let mut dashboard = Dashboard::default();
        dashboard.apply(&SystemEvent::lifecycle(SessionPhase::Detecting, "live detection started"));
        dashboard.apply(&SystemEvent::new(
            EventKind::Detection,
            EventPayload::Detection(DetectionEvent {
                count: 1,
                labels: vec!["bottle".into()],
                latency: None,
            }),
        ));
        assert_eq!(dashboard.phase, SessionPhase::Detecting);
        assert_eq!(dashboard.objects, vec!["bottle".to_string()]);
        assert_eq!(dashboard.status, "1 object(s)");

        dashboard.apply(&SystemEvent::lifecycle(SessionPhase::CameraActive, "live detection stopped"));
        assert!(dashboard.objects.is_empty());
        assert_eq!(dashboard.logs.len(), 3);
    }

    #[test]
    fn log_is_bounded() {
        let mut dashboard = Dashboard::default();
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            dashboard.push(i.to_string());
        }
        assert_eq!(dashboard.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(dashboard.logs.front().map(String::as_str), Some("5"));
    }
}
