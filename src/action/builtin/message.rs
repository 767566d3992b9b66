use anyhow::Result;

use crate::action::{Environment, Next, Stage};
use crate::util::shell::Status;

/// Prints a status line, then continues.
pub struct Message {
    name: String,
    status: Status,
    text: String,
}

impl Message {
    pub fn new(name: impl Into<String>, status: Status, text: impl Into<String>) -> Self {
        Message {
            name: name.into(),
            status,
            text: text.into(),
        }
    }
}

impl Stage for Message {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        env.ui().status(self.status, &self.text);
        next.run(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Builder;
    use crate::test_support::test_env;

    #[test]
    fn test_message_prints_and_continues() {
        let mut env = test_env();
        let runnable = Builder::new()
            .stage(Message::new("hello", Status::Info, "starting"))
            .stage(Message::new("bye", Status::Finished, "done"))
            .build(env.params(), env.sequences())
            .unwrap();

        runnable.call(&mut env).unwrap();

        let lines = env.ui().captured();
        assert!(lines[0].ends_with("Info starting"));
        assert!(lines[1].ends_with("Finished done"));
    }
}
