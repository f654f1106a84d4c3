#![cfg(feature = "tui")]

use crate::app::Session;
use crate::provider::{ChatResponseChunk, Provider};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct ChatLine {
    role: &'static str,
    text: String,
}

const HELP: &str = "Type a message and press Enter. Esc cancels a reply. Commands: /quit, /clear (screen only; the model keeps the conversation), /model <name>, /models";

struct Screen {
    model: String,
    input: String,
    lines: Vec<ChatLine>,
    streaming: bool,
}

impl Screen {
    fn system(&mut self, text: impl Into<String>) {
        self.lines.push(ChatLine {
            role: "system",
            text: text.into(),
        });
    }

    /// Empties the transcript. Provider context is untouched, so the next
    /// turn still continues the same conversation.
    fn clear(&mut self) {
        self.lines.clear();
        self.system("screen cleared; the conversation context is kept");
    }

    fn apply(&mut self, chunk: ChatResponseChunk) {
        if let Some(last) = self.lines.last_mut() {
            if last.role == "assistant" {
                last.text.push_str(&chunk.text);
            }
        }
        if chunk.done {
            self.streaming = false;
            if let Some(err) = chunk.error {
                self.lines.push(ChatLine { role: "error", text: err });
            }
        }
    }
}

pub async fn run_tui(provider: Arc<dyn Provider>) -> anyhow::Result<()> {
    let mut session = Session::start(provider);
    let model = session.bus().service().generate_request("").model;

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut screen = Screen {
        model,
        input: String::new(),
        lines: Vec::new(),
        streaming: false,
    };
    screen.system(HELP);

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &screen) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut screen, &session).await {
                        break Ok(());
                    }
                }
            }
            Some(chunk) = session.responses().recv() => screen.apply(chunk),
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Returns true when the user asked to quit.
async fn handle_key(key: KeyEvent, screen: &mut Screen, session: &Session) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc if screen.streaming => session.bus().cancel_turn(),
        KeyCode::Esc => return true,
        KeyCode::Char(c) => screen.input.push(c),
        KeyCode::Backspace => {
            screen.input.pop();
        }
        KeyCode::Enter => {
            let msg = screen.input.trim().to_string();
            screen.input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/clear" {
                screen.clear();
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/model ") {
                screen.model = rest.trim().to_string();
                session.bus().service().set_model(&screen.model);
                let text = format!("model set to: {}", screen.model);
                screen.system(text);
                return false;
            }
            if msg == "/models" {
                let text = match session.bus().service().retrieve_models().await {
                    Ok(models) => models
                        .iter()
                        .map(|m| m.name.as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(e) => format!("failed to list models: {e}"),
                };
                screen.system(text);
                return false;
            }

            if screen.streaming {
                screen.system("(streaming in progress; wait for completion)");
                return false;
            }

            screen.lines.push(ChatLine { role: "user", text: msg.clone() });
            screen.lines.push(ChatLine { role: "assistant", text: String::new() });
            screen.streaming = true;
            session.submit(&msg);
        }
        _ => {}
    }

    false
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, screen: &Screen) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for l in &screen.lines {
            let role = format!("{}: ", l.role);
            let style = match l.role {
                "user" | "error" => Style::default().add_modifier(Modifier::BOLD),
                _ => Style::default(),
            };
            text.lines.push(Line::styled(role, style));
            text.lines.extend(Text::from(l.text.clone()).lines);
            text.lines.push(Line::from(""));
        }

        let status = if screen.streaming { " (streaming)" } else { "" };
        let chat = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("termchat | model: {}{status}", screen.model)),
            )
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(screen.input.clone())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + screen.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
