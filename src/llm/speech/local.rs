use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;

use super::{ split_command, Playback, SpeechBackend, SpeechError };

/// On-device synthesizer driven through a command such as `espeak-ng` or `say`.
pub struct LocalSynthesizer {
    program: String,
    args: Vec<String>,
}

impl LocalSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    pub fn from_command_line(command_line: &str) -> Result<Self, SpeechError> {
        let (program, args) = split_command(command_line)?;
        Ok(Self::new(program, args))
    }
}

#[async_trait]
impl SpeechBackend for LocalSynthesizer {
    async fn start(&self, text: &str) -> Result<Playback, SpeechError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SpeechError::Unavailable(format!("{} not installed", self.program)),
                _ => SpeechError::Io(e),
            })?;
        Ok(Playback::new(child, None))
    }

    fn name(&self) -> String {
        format!("local:{}", self.program)
    }
}
