//! Title grammar
//!
//! Episode files look like `Show.Name.S02E05.720p.mkv` or `Show Name 205`;
//! movie files like `Movie.Name.(1999).mkv`. Names are normalised (dots and
//! underscores to spaces, trimmed, lower-cased) so that they can key the
//! association cache.

use once_cell::sync::Lazy;
use regex::Regex;
use theiamedia::{LookupQuery, LookupRequest, MediaRef};

use crate::error::{LookupError, Result};

static TV_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)[ ._-]+(?:[Ss](\d{1,2})[Ee](\d{1,3})|(\d)(\d{2}))(?:[ ._-]|$)")
        .expect("valid TV title pattern")
});

static MOVIE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)[ ._-]+\(?((?:19|20)\d{2})\)?(?:[ ._-]|$)")
        .expect("valid movie title pattern")
});

/// Extensions removed before matching
const FILE_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "mpg", "mpeg", "ts", "m2ts", "webm", "flv", "3gp",
    "ogv", "divx", "iso",
];

/// Title without its trailing file extension
pub fn parse_title(title: &str) -> &str {
    let title = title.trim();
    match title.rsplit_once('.') {
        Some((stem, ext))
            if FILE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext)) =>
        {
            stem
        }
        _ => title,
    }
}

pub fn normalize_name(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn classify_tv(title: &str) -> Result<LookupQuery> {
    let stem = parse_title(title);
    let caps = TV_PATTERN
        .captures(stem)
        .ok_or_else(|| LookupError::Unparseable(title.to_string()))?;

    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (season, episode) = match (number(2), number(3)) {
        (Some(season), Some(episode)) => (season, episode),
        _ => match (number(4), number(5)) {
            (Some(season), Some(episode)) => (season, episode),
            _ => return Err(LookupError::Unparseable(title.to_string())),
        },
    };

    let series = normalize_name(&caps[1]);
    if series.is_empty() {
        return Err(LookupError::Unparseable(title.to_string()));
    }
    Ok(LookupQuery::Episode {
        series,
        season,
        episode,
    })
}

pub fn classify_movie(title: &str) -> Result<LookupQuery> {
    let stem = parse_title(title);
    let caps = MOVIE_PATTERN
        .captures(stem)
        .ok_or_else(|| LookupError::Unparseable(title.to_string()))?;

    let name = normalize_name(&caps[1]);
    if name.is_empty() {
        return Err(LookupError::Unparseable(title.to_string()));
    }
    Ok(LookupQuery::Movie {
        name,
        year: caps[2].to_string(),
    })
}

/// Episode first, then movie
pub fn classify(title: &str) -> Result<LookupQuery> {
    classify_tv(title).or_else(|_| classify_movie(title))
}

/// Lookup request for a cached video, from its title
pub fn lookup_request(media: &MediaRef) -> Result<LookupRequest> {
    let query = classify(media.title())?;
    Ok(LookupRequest::new(media.clone(), query))
}
