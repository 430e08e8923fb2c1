/// Consumer side of the mailbox, run by the agent's prompt hook.
///
/// Whatever happens, the hook must not break the agent's prompt: problems are
/// logged to stderr and the process still exits successfully with nothing on
/// stdout.
use crate::mailbox::Mailbox;
use std::io::Write;

/// Take the pending message, if any, and print it to `out`.
/// Returns whether a message was delivered.
pub fn deliver(mailbox: &Mailbox, out: &mut impl Write) -> bool {
    let message = match mailbox.read_and_clear() {
        Ok(Some(message)) => message,
        Ok(None) => return false,
        Err(e) => {
            tracing::error!(error = %e, "could not read intervention mailbox");
            return false;
        }
    };

    if let Err(e) = writeln!(out, "{}", message.trim_end()).and_then(|()| out.flush()) {
        tracing::error!(error = %e, "failed to print intervention");
        return false;
    }
    tracing::debug!(path = %mailbox.path().display(), "intervention delivered to agent");
    true
}

/// Print the pending message without consuming it.
pub fn peek(mailbox: &Mailbox, out: &mut impl Write) -> std::io::Result<bool> {
    match mailbox.peek() {
        Ok(Some(message)) => {
            writeln!(out, "{}", message.trim_end())?;
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(e) => {
            tracing::error!(error = %e, "could not read intervention mailbox");
            Ok(false)
        }
    }
}
