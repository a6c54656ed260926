//! Runs a blocking device handler on its own thread and lets async code talk
//! to it through typed commands.
//!
//! Commands are executed one at a time in the order they were sent, so a
//! handler never sees two requests at once.

use std::{
    io,
    sync::mpsc::{Receiver, Sender},
};

use tokio::sync::oneshot;
use tracing::{debug, warn};

pub trait Command: Send {
    type Response: Send;
    type Handler: DeviceHandler<Command = Self>;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response>;
}

pub trait DeviceHandler {
    type Command: Command<Handler = Self>;
}

pub struct GenericCommand<C: Command> {
    command: C,
    response_ch: oneshot::Sender<io::Result<C::Response>>,
}

impl<C: Command> GenericCommand<C> {
    pub fn new(command: C, response_ch: oneshot::Sender<io::Result<C::Response>>) -> Self {
        Self {
            command,
            response_ch,
        }
    }

    /// Executes the command and hands the result back to the caller.
    ///
    /// Returns `false` when the caller stopped waiting for the answer.
    pub fn execute(self, handler: &mut C::Handler) -> bool {
        let result = self.command.execute(handler);

        if let Err(e) = &result {
            warn!("Command failed: {}", e);
        }

        self.response_ch.send(result).is_ok()
    }
}

pub struct CommandExecutor<H: DeviceHandler + Send + 'static> {
    handler: H,
    commands_ch: Receiver<GenericCommand<H::Command>>,
    sender: Sender<GenericCommand<H::Command>>,
}

impl<H: DeviceHandler + Send> CommandExecutor<H> {
    pub fn new(handler: H) -> Self {
        let (sender, commands_ch) = std::sync::mpsc::channel();

        Self {
            handler,
            commands_ch,
            sender,
        }
    }

    pub fn sender(&self) -> CommandSender<H::Command> {
        CommandSender::new(self.sender.clone())
    }

    /// Serves commands until every sender is gone.
    pub fn run(self) -> io::Result<()> {
        let Self {
            mut handler,
            commands_ch,
            sender,
        } = self;
        // Only external senders keep the loop alive.
        drop(sender);

        while let Ok(command) = commands_ch.recv() {
            if !command.execute(&mut handler) {
                debug!("Response receiver dropped before the answer was sent");
            }
        }

        debug!("All command senders dropped, executor stopping");
        Ok(())
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<io::Result<()>>
    where
        H::Command: 'static,
    {
        tokio::task::spawn_blocking(move || self.run())
    }
}

pub struct CommandSender<C: Command> {
    commands_ch: Sender<GenericCommand<C>>,
}

impl<C: Command> Clone for CommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            commands_ch: self.commands_ch.clone(),
        }
    }
}

impl<C: Command> CommandSender<C> {
    pub fn new(commands_ch: Sender<GenericCommand<C>>) -> Self {
        Self { commands_ch }
    }

    pub async fn send_command(&self, command: C) -> io::Result<C::Response> {
        let (response_ch, response_rx) = oneshot::channel();
        let command = GenericCommand::new(command, response_ch);

        self.commands_ch
            .send(command)
            .map_err(|_| io::Error::other("Failed to send command"))?;

        response_rx
            .await
            .map_err(|_| io::Error::other("Failed to receive response"))?
    }
}
