//! Textual XKB keymap synthesis for virtual-keyboard key injection (C8).
//!
//! Grounded on `original_source/wl_framework/protocols/_keymap.py`'s
//! `KeyMap` class: an insertion-ordered character/key-name table, a
//! `libxkbcommon`-backed symbol lookup with a built-in fallback, and a
//! hand-assembled XKB keymap text format (`xkb_keycodes`/`xkb_types`/
//! `xkb_compatibility`/`xkb_symbols`).

use std::collections::HashMap;

use crate::error::{Error, Result};

/// `KEY_OFFSET` in the original: XKB keycodes conventionally start 8 above
/// the Linux evdev keycode space, and this crate's virtual keycodes start
/// there too so compositors that assume evdev-like numbering still work.
const KEYCODE_OFFSET: u32 = 8;

/// A single entry in the keymap: the XKB symbol name assigned to a
/// synthesized keycode.
#[derive(Debug, Clone)]
struct Entry {
    keycode_index: u32,
    symbol: String,
}

/// Builds a virtual keymap one character/key-name at a time, in the order
/// they are first requested — matching `KeyMap._map`'s insertion order,
/// which the original relies on to keep keycodes stable across a session.
pub struct KeyMap {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    xkbcommon: Option<XkbCommonLookup>,
    /// Set whenever a new entry is added; cleared by [`Self::take_changed`].
    /// Matches `KeyMap.changed`, which `_update_keymap` checks to decide
    /// whether the keymap needs re-uploading.
    changed: bool,
}

impl KeyMap {
    pub fn new() -> Self {
        let mut km = Self {
            entries: Vec::new(),
            index: HashMap::new(),
            xkbcommon: XkbCommonLookup::try_load(),
            changed: true,
        };
        km.prime_ascii();
        km
    }

    /// Returns whether the keymap has grown since the last call, clearing
    /// the flag. Matches `_update_keymap`'s `if not self._keymap.changed:
    /// return` / `self._keymap.changed = False` pair.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Pre-populate printable ASCII, matching `KeyMap._prime()`: these are
    /// common enough that giving them stable low keycodes up front avoids
    /// keymap churn for ordinary typing.
    fn prime_ascii(&mut self) {
        for c in (0x20u8..=0x7e).map(char::from) {
            self.get_key(&c.to_string());
        }
    }

    /// Look up (assigning if new) the keycode for a character or named key
    /// (e.g. `"a"`, `"home"`, `"kp_5"`), returning the Linux/XKB keycode
    /// (already offset by [`KEYCODE_OFFSET`]). Matches `KeyMap.get_key`:
    /// multi-character names are case-folded before lookup, since `"Home"`
    /// and `"home"` name the same key, while single characters stay
    /// case-sensitive, since `'A'` and `'a'` are different keysyms.
    pub fn get_key(&mut self, ch: &str) -> u32 {
        let key = if ch.chars().count() > 1 { ch.to_lowercase() } else { ch.to_string() };
        if let Some(&idx) = self.index.get(&key) {
            return self.entries[idx].keycode_index + KEYCODE_OFFSET;
        }
        let symbol = self.get_symbol(&key);
        let keycode_index = self.entries.len() as u32;
        self.entries.push(Entry { keycode_index, symbol });
        self.index.insert(key, self.entries.len() - 1);
        self.changed = true;
        keycode_index + KEYCODE_OFFSET
    }

    /// Assign keycodes for every character of `s` in order, returning them.
    pub fn get_keys(&mut self, s: &str) -> Vec<u32> {
        s.chars().map(|c| self.get_key(&c.to_string())).collect()
    }

    /// Resolve a character to its XKB symbol name, preferring
    /// `libxkbcommon` when available (matches
    /// `KeyMap.get_symbol`/`_get_symbol_xkb`), falling back to the built-in
    /// table and the `U+xxxx` unicode-plane encoding otherwise
    /// (`_get_symbol_no_xkb`).
    fn get_symbol(&self, ch: &str) -> String {
        if let Some(xkb) = &self.xkbcommon {
            if let Some(sym) = xkb.lookup(ch) {
                return sym;
            }
        }
        Self::symbol_fallback(ch)
    }

    fn symbol_fallback(ch: &str) -> String {
        if let Some(named) = FALLBACK_TABLE.iter().find(|(c, _)| *c == ch) {
            return named.1.to_string();
        }
        if ch.chars().count() > 1 {
            if let Some(named) = NAMED_KEY_TABLE.iter().find(|(name, _)| *name == ch) {
                return named.1.to_string();
            }
            return "NoSymbol".to_string();
        }
        let Some(c) = ch.chars().next() else {
            return "NoSymbol".to_string();
        };
        let code_point = c as u32;
        if (0x20..=0x7e).contains(&code_point) {
            // Legacy ASCII: the character is its own XKB symbol name.
            return c.to_string();
        }
        if (0xa0..=0x10ffff).contains(&code_point) {
            // xkbcommon-keysyms.h's Unicode-plane convention.
            return format!("U{:04X}", code_point);
        }
        // C0/C1 control space: no symbol.
        "NoSymbol".to_string()
    }

    /// Render the accumulated table as a complete XKB keymap text blob,
    /// matching `KeyMap._generate`/`serialize`'s
    /// `xkb_keymap { xkb_keycodes {...} xkb_types {...}
    /// xkb_compatibility {...} xkb_symbols {...} }` structure.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str("xkb_keymap {\n");

        out.push_str("\txkb_keycodes \"virt_map\" {\n");
        out.push_str(&format!("\t\tminimum = {};\n", KEYCODE_OFFSET));
        out.push_str(&format!("\t\tmaximum = {};\n", KEYCODE_OFFSET + self.entries.len() as u32 + 1));
        for entry in &self.entries {
            out.push_str(&format!(
                "\t\t<K{idx}> = {code};\n",
                idx = entry.keycode_index,
                code = entry.keycode_index + KEYCODE_OFFSET
            ));
        }
        out.push_str("\t};\n");

        out.push_str("\txkb_types \"virt_map\" {\n");
        out.push_str("\t\tvirtual_modifiers NumLock,Alt,LevelThree;\n");
        out.push_str("\t\ttype \"ONE_LEVEL\" {\n\t\t\tmodifiers = none;\n\t\t\tlevel_name[Level1] = \"Any\";\n\t\t};\n");
        out.push_str("\t};\n");

        out.push_str("\txkb_compatibility \"virt_map\" {\n\t\tinterpret.repeat = False;\n\t};\n");

        out.push_str("\txkb_symbols \"virt_map\" {\n");
        for entry in &self.entries {
            out.push_str(&format!(
                "\t\tkey <K{idx}> {{ [ {sym} ] }};\n",
                idx = entry.keycode_index,
                sym = entry.symbol
            ));
        }
        out.push_str("\t};\n");

        out.push_str("};\n");
        out
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::new()
    }
}

/// A small set of named symbols for characters that are not their own XKB
/// symbol name, matching the hand-maintained table in
/// `_get_symbol_no_xkb`.
const FALLBACK_TABLE: &[(&str, &str)] = &[
    (" ", "space"),
    ("\t", "Tab"),
    ("\n", "Return"),
    ("!", "exclam"),
    ("\"", "quotedbl"),
    ("#", "numbersign"),
    ("$", "dollar"),
    ("%", "percent"),
    ("&", "ampersand"),
    ("'", "apostrophe"),
    ("(", "parenleft"),
    (")", "parenright"),
    ("*", "asterisk"),
    ("+", "plus"),
    (",", "comma"),
    ("-", "minus"),
    (".", "period"),
    ("/", "slash"),
    (":", "colon"),
    (";", "semicolon"),
    ("<", "less"),
    ("=", "equal"),
    (">", "greater"),
    ("?", "question"),
    ("@", "at"),
    ("[", "bracketleft"),
    ("\\", "backslash"),
    ("]", "bracketright"),
    ("^", "asciicircum"),
    ("_", "underscore"),
    ("`", "grave"),
    ("{", "braceleft"),
    ("|", "bar"),
    ("}", "braceright"),
    ("~", "asciitilde"),
];

/// Named (multi-character) keys, matching `_get_symbol_no_xkb`'s hand-kept
/// table of keysym names for keys with no single-character representation
/// (navigation, editing, and keypad keys). Looked up only after a
/// `libxkbcommon` `xkb_keysym_from_name` lookup has already failed or is
/// unavailable; names here are canonical `xkbcommon-keysyms.h` spellings.
const NAMED_KEY_TABLE: &[(&str, &str)] = &[
    ("backspace", "BackSpace"),
    ("tab", "Tab"),
    ("linefeed", "Linefeed"),
    ("clear", "Clear"),
    ("return", "Return"),
    ("pause", "Pause"),
    ("scroll_lock", "Scroll_Lock"),
    ("sys_req", "Sys_Req"),
    ("escape", "Escape"),
    ("delete", "Delete"),
    ("home", "Home"),
    ("left", "Left"),
    ("up", "Up"),
    ("right", "Right"),
    ("down", "Down"),
    ("prior", "Prior"),
    ("page_up", "Prior"),
    ("next", "Next"),
    ("page_down", "Next"),
    ("end", "End"),
    ("begin", "Begin"),
    ("print", "Print"),
    ("insert", "Insert"),
    ("undo", "Undo"),
    ("redo", "Redo"),
    ("menu", "Menu"),
    ("find", "Find"),
    ("cancel", "Cancel"),
    ("help", "Help"),
    ("break", "Break"),
    ("num_lock", "Num_Lock"),
    ("kp_0", "KP_0"),
    ("kp_1", "KP_1"),
    ("kp_2", "KP_2"),
    ("kp_3", "KP_3"),
    ("kp_4", "KP_4"),
    ("kp_5", "KP_5"),
    ("kp_6", "KP_6"),
    ("kp_7", "KP_7"),
    ("kp_8", "KP_8"),
    ("kp_9", "KP_9"),
];

/// An optional `dlopen`-based lookup through the system's `libxkbcommon`,
/// matching `_get_symbol_xkb`'s `ctypes.CDLL("libxkbcommon.so.0")`. This
/// crate uses `libc::dlopen`/`dlsym` directly rather than `ctypes`, the way
/// `wayland-sys`'s optional `dlopen` feature loads `libwayland-client.so`.
struct XkbCommonLookup {
    handle: *mut libc::c_void,
    keysym_to_utf32: unsafe extern "C" fn(u32) -> u32,
    utf32_to_keysym: unsafe extern "C" fn(u32) -> u32,
    keysym_get_name: unsafe extern "C" fn(u32, *mut libc::c_char, libc::size_t) -> i32,
    keysym_from_name: unsafe extern "C" fn(*const libc::c_char, i32) -> u32,
}

/// `xkb_keysym_from_name`'s `XKB_KEYSYM_CASE_INSENSITIVE` flag, matching
/// `_get_symbol_xkb`'s use of the same constant so named keys resolve
/// regardless of the caller's capitalization.
const XKB_KEYSYM_CASE_INSENSITIVE: i32 = 1;

impl XkbCommonLookup {
    fn try_load() -> Option<Self> {
        unsafe {
            let lib_name = std::ffi::CString::new("libxkbcommon.so.0").ok()?;
            let handle = libc::dlopen(lib_name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
            if handle.is_null() {
                return None;
            }
            let utf32_to_keysym = Self::load_sym(handle, "xkb_utf32_to_keysym")?;
            let keysym_get_name = Self::load_sym(handle, "xkb_keysym_get_name")?;
            let keysym_to_utf32 = Self::load_sym(handle, "xkb_keysym_to_utf32")?;
            let keysym_from_name = Self::load_sym(handle, "xkb_keysym_from_name")?;
            Some(Self {
                handle,
                keysym_to_utf32: std::mem::transmute(keysym_to_utf32),
                utf32_to_keysym: std::mem::transmute(utf32_to_keysym),
                keysym_get_name: std::mem::transmute(keysym_get_name),
                keysym_from_name: std::mem::transmute(keysym_from_name),
            })
        }
    }

    unsafe fn load_sym(handle: *mut libc::c_void, name: &str) -> Option<*mut libc::c_void> {
        let cname = std::ffi::CString::new(name).ok()?;
        let sym = libc::dlsym(handle, cname.as_ptr());
        if sym.is_null() {
            None
        } else {
            Some(sym)
        }
    }

    /// Resolve a single character via `xkb_utf32_to_keysym`, or a named key
    /// (`"home"`, `"kp_5"`, ...) via `xkb_keysym_from_name`, matching
    /// `_get_symbol_xkb`'s `len(name) == 1` branch.
    fn lookup(&self, ch: &str) -> Option<String> {
        let keysym = if ch.chars().count() == 1 {
            let c = ch.chars().next()?;
            unsafe {
                let keysym = (self.utf32_to_keysym)(c as u32);
                if keysym == 0 {
                    return None;
                }
                // Round-trip to confirm the keysym actually maps back,
                // guarding against libxkbcommon's "best effort" fallback
                // for unmapped code points.
                if (self.keysym_to_utf32)(keysym) != c as u32 {
                    return None;
                }
                keysym
            }
        } else {
            let cname = std::ffi::CString::new(ch).ok()?;
            let keysym = unsafe { (self.keysym_from_name)(cname.as_ptr(), XKB_KEYSYM_CASE_INSENSITIVE) };
            if keysym == 0 {
                return None;
            }
            keysym
        };

        unsafe {
            let mut buf = [0 as libc::c_char; 64];
            let len = (self.keysym_get_name)(keysym, buf.as_mut_ptr(), buf.len());
            if len <= 0 {
                return None;
            }
            let cstr = std::ffi::CStr::from_ptr(buf.as_ptr());
            cstr.to_str().ok().map(|s| s.to_string())
        }
    }
}

impl Drop for XkbCommonLookup {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

/// Validate that `name` is usable as an XKB type/value identifier. Not part
/// of the original, but guards against callers constructing a [`KeyMap`]
/// out of band and feeding raw compositor strings straight into
/// [`KeyMap::serialize`]'s output.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidArgument(format!("invalid xkb identifier: {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_primed_and_stable() {
        let mut km = KeyMap::new();
        let a1 = km.get_key("a");
        let a2 = km.get_key("a");
        assert_eq!(a1, a2);
    }

    #[test]
    fn changed_flag_tracks_new_entries() {
        let mut km = KeyMap::new();
        // Priming itself marks the map changed.
        assert!(km.take_changed());
        assert!(!km.take_changed());

        km.get_key("a"); // already primed ASCII, no new entry
        assert!(!km.take_changed());

        km.get_key("€"); // new entry
        assert!(km.take_changed());
        assert!(!km.take_changed());
    }

    #[test]
    fn new_characters_get_fresh_keycodes() {
        let mut km = KeyMap::new();
        let before = km.serialize();
        let unicode_key = km.get_key("é");
        let after = km.serialize();
        assert_ne!(before, after);
        assert!(unicode_key >= KEYCODE_OFFSET);
    }

    #[test]
    fn serialize_contains_all_sections() {
        let mut km = KeyMap::new();
        km.get_key("x");
        let text = km.serialize();
        assert!(text.contains("xkb_keycodes"));
        assert!(text.contains("xkb_types"));
        assert!(text.contains("xkb_compatibility"));
        assert!(text.contains("xkb_symbols"));
    }

    #[test]
    fn fallback_table_covers_punctuation() {
        assert_eq!(KeyMap::symbol_fallback(" "), "space");
        assert_eq!(KeyMap::symbol_fallback("!"), "exclam");
    }

    #[test]
    fn unassigned_unicode_uses_u_plane_encoding() {
        let sym = KeyMap::symbol_fallback("€");
        assert_eq!(sym, "U20AC");
    }

    #[test]
    fn ascii_letters_and_digits_are_their_own_symbol() {
        assert_eq!(KeyMap::symbol_fallback("a"), "a");
        assert_eq!(KeyMap::symbol_fallback("Z"), "Z");
        assert_eq!(KeyMap::symbol_fallback("7"), "7");
    }

    #[test]
    fn c1_control_range_has_no_symbol() {
        let sym = KeyMap::symbol_fallback(&char::from_u32(0x85).unwrap().to_string());
        assert_eq!(sym, "NoSymbol");
    }

    #[test]
    fn named_multi_char_keys_resolve_via_fallback_table() {
        assert_eq!(KeyMap::symbol_fallback("home"), "Home");
        assert_eq!(KeyMap::symbol_fallback("kp_5"), "KP_5");
        assert_eq!(KeyMap::symbol_fallback("page_up"), "Prior");
    }

    #[test]
    fn get_key_case_folds_named_keys_but_not_single_chars() {
        let mut km = KeyMap::new();
        let home1 = km.get_key("home");
        let home2 = km.get_key("Home");
        assert_eq!(home1, home2);

        let lower_a = km.get_key("a");
        let upper_a = km.get_key("A");
        assert_ne!(lower_a, upper_a);
    }
}
