//! The plugin every `vagabond` invocation loads.
//!
//! Registers the box actions and a small host table:
//!
//! ```text
//! posix
//! ├── linux
//! └── bsd
//!     ├── darwin
//!     └── freebsd
//! ```

use anyhow::Result;
use serde_json::{json, Value};

use crate::action::builtin::{BoxAdd, BoxRemove, BOX_ADD_ACTION, BOX_REMOVE_ACTION};
use crate::action::{Builder, Environment};
use crate::capability::SubjectKind;
use crate::plugin::{Plugin, Registrar};

/// Capability returning the host's OS family.
pub const OS_FAMILY: &str = "os_family";

/// Capability returning the shell used to run host commands.
pub const SHELL: &str = "shell";

const DETECT_LINUX: &str = "uname -s | grep -qi '^linux'";
const DETECT_DARWIN: &str = "uname -s | grep -qi '^darwin'";
const DETECT_FREEBSD: &str = "uname -s | grep -qi '^freebsd'";
const DETECT_BSD: &str = "uname -s | grep -qi 'bsd'";

#[derive(Debug, Default)]
pub struct BuiltinPlugin;

fn reply(value: &'static str) -> impl Fn(&mut Environment, &[Value]) -> Result<Value> + Send + Sync {
    move |_, _| Ok(json!(value))
}

impl Plugin for BuiltinPlugin {
    fn name(&self) -> &str {
        "builtin"
    }

    fn register(&self, registrar: &mut Registrar) -> Result<()> {
        registrar
            .action(BOX_ADD_ACTION, Builder::new().stage(BoxAdd))
            .action(BOX_REMOVE_ACTION, Builder::new().stage(BoxRemove));

        let host = SubjectKind::Host;
        let caps = registrar.capabilities();
        caps.register_parent(host, "linux", "posix")?
            .register_parent(host, "bsd", "posix")?
            .register_parent(host, "darwin", "bsd")?
            .register_parent(host, "freebsd", "bsd")?;

        caps.register_detector(host, "linux", 10, |p| p.test(DETECT_LINUX))
            .register_detector(host, "darwin", 10, |p| p.test(DETECT_DARWIN))
            .register_detector(host, "freebsd", 10, |p| p.test(DETECT_FREEBSD))
            .register_detector(host, "bsd", 5, |p| p.test(DETECT_BSD));

        caps.register(host, "posix", SHELL, reply("sh"))
            .register(host, "linux", OS_FAMILY, reply("linux"))
            .register(host, "bsd", OS_FAMILY, reply("bsd"))
            .register(host, "darwin", OS_FAMILY, reply("darwin"));

        Ok(())
    }
}
