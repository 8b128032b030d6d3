//! `WAYLAND_DEBUG` wire-level logging helpers, grounded on
//! `wayland-backend`'s `debug` module's
//! `print_send_message`/`print_dispatched_message` line shape.
//!
//! [`crate::connection::Connection`] calls these directly rather than
//! formatting ad hoc, so every log line across requests and events shares
//! one format.

/// Format a request about to be sent, e.g.
//  `-> wl_registry#2.bind(10, "wl_seat", 7, new id wl_seat#5)`.
pub fn format_request(interface: &str, object_id: u32, method: &str, args_desc: &str) -> String {
    format!("-> {interface}#{object_id}.{method}({args_desc})")
}

/// Format an event just dispatched, e.g.
/// `<- wl_registry#2.global(10, "wl_seat", 7)`.
pub fn format_event(interface: &str, object_id: u32, method: &str, args_desc: &str) -> String {
    format!("<- {interface}#{object_id}.{method}({args_desc})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_and_event_lines_are_distinguishable() {
        let req = format_request("wl_registry", 2, "bind", "10");
        let ev = format_event("wl_registry", 2, "global", "10");
        assert!(req.starts_with("->"));
        assert!(ev.starts_with("<-"));
    }
}
