/// Substitution table of visually similar code points for ASCII letters.
const LOOKALIKES: [(char, char); 52] = [
    ('a', 'ă'),
    ('b', 'ḃ'),
    ('c', 'ċ'),
    ('d', 'ḋ'),
    ('e', 'ė'),
    ('f', 'ḟ'),
    ('g', 'ġ'),
    ('h', 'ħ'),
    ('i', 'ĩ'),
    ('j', 'ǰ'),
    ('k', 'ķ'),
    ('l', 'ŀ'),
    ('m', 'ṁ'),
    ('n', 'ռ'),
    ('o', 'ő'),
    ('p', 'ṗ'),
    ('q', 'ʠ'),
    ('r', 'ŕ'),
    ('s', 'ś'),
    ('t', 'ţ'),
    ('u', 'ũ'),
    ('v', 'ṿ'),
    ('w', 'ẃ'),
    ('x', 'ж'),
    ('y', 'ỹ'),
    ('z', 'ź'),
    ('A', 'Ă'),
    ('B', 'Ḃ'),
    ('C', 'Ċ'),
    ('D', 'Ḋ'),
    ('E', 'Ė'),
    ('F', 'Ḟ'),
    ('G', 'Ġ'),
    ('H', 'Ħ'),
    ('I', 'Ĩ'),
    ('J', 'Ĵ'),
    ('K', 'Ķ'),
    ('L', 'Ŀ'),
    ('M', 'Ṁ'),
    ('N', 'Ռ'),
    ('O', 'Ő'),
    ('P', '尸'),
    ('Q', 'Ǫ'),
    ('R', 'Ŕ'),
    ('S', 'Ś'),
    ('T', 'Ţ'),
    ('U', 'Ũ'),
    ('V', 'Ṿ'),
    ('W', 'Ẃ'),
    ('X', 'Ж'),
    ('Y', 'Ỹ'),
    ('Z', 'Ź'),
];

fn substitute(ch: char) -> char {
    LOOKALIKES
        .iter()
        .find(|(from, _)| *from == ch)
        .map(|(_, to)| *to)
        .unwrap_or(ch)
}

/// Replace every ASCII letter with a look-alike code point.
///
/// Characters outside the table pass through unchanged. This is visual
/// obfuscation only; the output is not meant to be decoded.
pub fn encode(text: &str) -> String {
    text.chars().map(substitute).collect()
}
