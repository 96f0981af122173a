//! Warehouse-safe column names.
//!
//! Provider headers are German prose with units in brackets
//! (`Wert [MWh]`, `Braunkohle [MWh] Originalauflösungen`). Warehouse column
//! identifiers only allow `[A-Za-z0-9_]`, so umlauts and sharp-s are spelled
//! out as ASCII digraphs and every other character becomes `_`, with runs of
//! `_` collapsed and trimmed at both ends.

/// Map one header string to a legal identifier. Pure, total and idempotent.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut push = |c: char| {
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            return;
        }
        out.push(c);
    };

    for c in name.chars() {
        match transliterate(c) {
            Some(digraph) => digraph.chars().for_each(&mut push),
            None if c.is_ascii_alphanumeric() => push(c),
            None => push('_'),
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'ä' => "ae",
        'ö' => "oe",
        'ü' => "ue",
        'Ä' => "Ae",
        'Ö' => "Oe",
        'Ü' => "Ue",
        'ß' => "ss",
        'ẞ' => "SS",
        _ => return None,
    })
}
