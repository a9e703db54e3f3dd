//! Embedded built-in dictionaries.
//!
//! The source-of-truth lives in `marker-ranger-aruco/data/*_CODES.json`.

#![allow(clippy::unreadable_literal, non_upper_case_globals)]

include!(concat!(env!("OUT_DIR"), "/builtins.rs"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let d = builtin_dictionary("dict_4x4_50").expect("known dictionary");
        assert_eq!(d.name, "DICT_4X4_50");
        assert_eq!(d.codes.len(), 50);
        assert!(builtin_dictionary("DICT_7X7_1000").is_none());
    }

    #[test]
    fn larger_dictionary_extends_smaller_one() {
        assert_eq!(&DICT_4X4_100.codes[..50], DICT_4X4_50.codes);
    }
}
