use std::io::Write;

use crossbeam::channel::{Receiver, Sender};

use crate::{
    error::TurnError,
    llm::{cancel_pair, CancelHandle, CancelToken},
};

use super::Session;

/// Work for the session thread.
#[derive(Debug)]
pub enum Command {
    Onboard(String),
    Chat {
        turn: u64,
        text: String,
        cancel: CancelToken,
    },
    History,
}

/// What the session thread reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Onboarded { name: String, greeting: String },
    OnboardFailed(String),
    Reply { turn: u64, text: String },
    TurnFailed { turn: u64, error: TurnError },
    History(String),
}

/// Runs `session` on its own thread so the terminal stays responsive during inference.
pub fn spawn_session(
    mut session: Session,
) -> (Sender<Command>, Receiver<Event>, std::thread::JoinHandle<()>) {
    let (command_tx, command_rx) = crossbeam::channel::unbounded::<Command>();
    let (event_tx, event_rx) = crossbeam::channel::unbounded();

    let join = std::thread::spawn(move || {
        while let Ok(command) = command_rx.recv() {
            let event = match command {
                Command::Onboard(name) => match session.onboard(&name) {
                    Ok(()) => Event::Onboarded {
                        name: session.character.name().unwrap_or(&name).to_string(),
                        greeting: session
                            .conversation
                            .history()
                            .last()
                            .map(|m| m.content().to_string())
                            .unwrap_or_default(),
                    },
                    Err(e) => Event::OnboardFailed(format!("{e:#}")),
                },
                Command::Chat { turn, text, cancel } => match session.chat(&text, &cancel) {
                    Ok(text) => Event::Reply { turn, text },
                    Err(error) => {
                        log::warn!("turn {turn} failed: {error}");
                        Event::TurnFailed { turn, error }
                    }
                },
                Command::History => Event::History(session.conversation.to_string()),
            };
            if event_tx.send(event).is_err() {
                break;
            }
        }
    });

    (command_tx, event_rx, join)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Exit,
    Stop,
    History,
    Empty,
    Line(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Input::Empty,
            "exit!" => Input::Exit,
            "/stop" => Input::Stop,
            "/history" => Input::History,
            _ => Input::Line(line.to_string()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Output {
    Exit,
    Normal,
}

fn listen_user_input(tx: Sender<String>) {
    let stdin = std::io::stdin();
    loop {
        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Naming,
    Onboarding,
    Ready(String),
}

/// Line-oriented chat front end.
pub struct TerminalApp<W> {
    commands: Sender<Command>,
    events: Receiver<Event>,
    /// The turn in flight, if any, and how to stop it.
    pending: Option<(u64, CancelHandle)>,
    next_turn: u64,
    stage: Stage,
    out: W,
}

impl<W: Write> TerminalApp<W> {
    pub fn new(
        commands: Sender<Command>,
        events: Receiver<Event>,
        character: Option<String>,
        mut out: W,
    ) -> anyhow::Result<Self> {
        let stage = match character {
            Some(name) => {
                commands.send(Command::Onboard(name.clone()))?;
                writeln!(out, "Retrieving data on {name} ...")?;
                Stage::Onboarding
            }
            None => {
                writeln!(out, "What character would you like me to be?")?;
                Stage::Naming
            }
        };
        Ok(Self {
            commands,
            events,
            pending: None,
            next_turn: 0,
            stage,
            out,
        })
    }

    pub fn handler_input(&mut self, input: Input) -> anyhow::Result<Output> {
        match input {
            Input::Exit => return Ok(Output::Exit),
            Input::Empty => {}
            Input::Stop => match self.pending.take() {
                Some((_, handle)) => handle.cancel(),
                None => writeln!(self.out, "nothing to stop")?,
            },
            Input::History => self.commands.send(Command::History)?,
            Input::Line(line) => match self.stage.clone() {
                Stage::Naming => {
                    writeln!(self.out, "Retrieving data on {line} ...")?;
                    self.commands.send(Command::Onboard(line))?;
                    self.stage = Stage::Onboarding;
                }
                Stage::Onboarding => writeln!(self.out, "still getting ready, one moment")?,
                Stage::Ready(name) if self.pending.is_some() => {
                    writeln!(self.out, "{name} is still answering (/stop to cancel)")?
                }
                Stage::Ready(_) => {
                    let (handle, cancel) = cancel_pair();
                    let turn = self.next_turn;
                    self.next_turn += 1;
                    self.commands.send(Command::Chat {
                        turn,
                        text: line,
                        cancel,
                    })?;
                    self.pending = Some((turn, handle));
                }
            },
        }
        Ok(Output::Normal)
    }

    pub fn handler_event(&mut self, event: Event) -> anyhow::Result<()> {
        match event {
            Event::Onboarded { name, greeting } => {
                writeln!(self.out, "{name}: {greeting}")?;
                self.stage = Stage::Ready(name);
            }
            Event::OnboardFailed(reason) => {
                writeln!(self.out, "could not start: {reason}")?;
                writeln!(self.out, "What character would you like me to be?")?;
                self.stage = Stage::Naming;
            }
            Event::Reply { turn, text } => {
                self.finish(turn);
                let name = match &self.stage {
                    Stage::Ready(name) => name.as_str(),
                    _ => "assistant",
                };
                writeln!(self.out, "{name}: {text}")?;
            }
            Event::TurnFailed { turn, error } => {
                self.finish(turn);
                writeln!(self.out, "turn failed: {error}")?;
            }
            Event::History(history) => write!(self.out, "{history}")?,
        }
        Ok(())
    }

    /// Forgets the pending turn only if `turn` is the one in flight.
    fn finish(&mut self, turn: u64) {
        if matches!(self.pending, Some((current, _)) if current == turn) {
            self.pending = None;
        }
    }

    pub fn run_loop(mut self) -> anyhow::Result<()> {
        let (input_tx, input_rx) = crossbeam::channel::unbounded();
        std::thread::spawn(move || listen_user_input(input_tx));

        loop {
            let output = crossbeam::select! {
                recv(input_rx) -> line => match line {
                    Ok(line) => self.handler_input(Input::parse(&line))?,
                    Err(_) => Output::Exit,
                },
                recv(self.events) -> event => match event {
                    Ok(event) => {
                        self.handler_event(event)?;
                        Output::Normal
                    }
                    Err(_) => Output::Exit,
                },
            };
            if output == Output::Exit {
                break;
            }
        }
        if let Some((_, handle)) = self.pending.take() {
            handle.cancel();
        }
        Ok(())
    }
}
