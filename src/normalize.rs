// src/normalize.rs
//! Text and date cleanup used by source adapters and the staleness check.
//!
//! Scraped dates arrive in many shapes ("2024-07-20", "2024年07月20日",
//! "1721404800000", "3 小时前"). Everything here is pure; callers decide what
//! an unparsable value means.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::OnceCell;
use regex::Regex;

/// Parse a loosely formatted publish date down to calendar-day granularity.
///
/// `reference_now` anchors relative forms such as "2 小时 5 分钟前".
/// Returns `None` when nothing recognizable is found.
pub fn parse_published_date(raw: &str, reference_now: NaiveDateTime) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(d) = parse_unix_timestamp(s) {
        return Some(d);
    }
    if let Some(d) = parse_relative_time(s, reference_now) {
        return Some(d.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local().date());
    }

    let cleaned = replace_cjk(s);
    parse_calendar_date(&cleaned)
}

/// Resolve "N 小时 M 分钟 K 秒前" against `now`. Needs at least one unit.
pub fn parse_relative_time(s: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    static RE_H: OnceCell<Regex> = OnceCell::new();
    static RE_M: OnceCell<Regex> = OnceCell::new();
    static RE_S: OnceCell<Regex> = OnceCell::new();
    let re_h = RE_H.get_or_init(|| Regex::new(r"(\d+)\s*小时").expect("hours regex"));
    let re_m = RE_M.get_or_init(|| Regex::new(r"(\d+)\s*分钟").expect("minutes regex"));
    let re_s = RE_S.get_or_init(|| Regex::new(r"(\d+)\s*秒").expect("seconds regex"));

    let grab = |re: &Regex| -> Option<i64> {
        re.captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    };
    let (h, m, sec) = (grab(re_h), grab(re_m), grab(re_s));
    if h.is_none() && m.is_none() && sec.is_none() {
        return None;
    }

    let offset = Duration::try_hours(h.unwrap_or(0))?
        + Duration::try_minutes(m.unwrap_or(0))?
        + Duration::try_seconds(sec.unwrap_or(0))?;
    now.checked_sub_signed(offset)
}

/// Decode HTML entities, strip tags, collapse whitespace and trim.
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

// 10 digits = seconds, 13 digits = milliseconds (OKX publishTime).
fn parse_unix_timestamp(s: &str) -> Option<NaiveDate> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = s.parse().ok()?;
    let dt = match s.len() {
        10 => DateTime::from_timestamp(n, 0)?,
        13 => DateTime::from_timestamp_millis(n)?,
        _ => return None,
    };
    Some(dt.with_timezone(&chrono::Local).date_naive())
}

fn replace_cjk(s: &str) -> String {
    static RE_CJK: OnceCell<Regex> = OnceCell::new();
    let re = RE_CJK.get_or_init(|| Regex::new(r"[\u{4e00}-\u{9fff}]").expect("cjk regex"));
    re.replace_all(s, "-").to_string()
}

fn parse_calendar_date(s: &str) -> Option<NaiveDate> {
    // Pull the first y-m-d triple out of whatever surrounds it
    // ("2024-07-20 10:00 UTC", "2024-07-20-", "Published 2024/7/20").
    static RE_YMD: OnceCell<Regex> = OnceCell::new();
    let re = RE_YMD.get_or_init(|| {
        Regex::new(r"(\d{4})\s*[-/.]\s*(\d{1,2})\s*[-/.]\s*(\d{1,2})").expect("y-m-d regex")
    });
    if let Some(c) = re.captures(s) {
        let y = c[1].parse().ok()?;
        let m = c[2].parse().ok()?;
        let d = c[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }

    // Trailing year: day first ("01/07/2024 10:00:00", KuCoin), month first
    // only when that is the sole valid reading ("07/15/2024").
    static RE_DMY: OnceCell<Regex> = OnceCell::new();
    let re = RE_DMY.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})\s*[-/.]\s*(\d{1,2})\s*[-/.]\s*(\d{4})\b").expect("d-m-y regex")
    });
    if let Some(c) = re.captures(s) {
        let a: u32 = c[1].parse().ok()?;
        let b: u32 = c[2].parse().ok()?;
        let y: i32 = c[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, b, a).or_else(|| NaiveDate::from_ymd_opt(y, a, b));
    }

    // Compact "20240701", optionally followed by a time.
    static RE_COMPACT: OnceCell<Regex> = OnceCell::new();
    let re = RE_COMPACT
        .get_or_init(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})(?:\D|$)").expect("compact date regex"));
    if let Some(c) = re.captures(s) {
        let y = c[1].parse().ok()?;
        let m = c[2].parse().ok()?;
        let d = c[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }

    // Month names; anything after the year ("Jul 1, 2024 10:00 UTC") is ignored.
    for fmt in ["%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d %B %Y"] {
        if let Ok((d, _rest)) = NaiveDate::parse_and_remainder(s, fmt) {
            return Some(d);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 24)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_and_slash_dates() {
        assert_eq!(parse_published_date("2024-07-20", now()), Some(ymd(2024, 7, 20)));
        assert_eq!(parse_published_date("2024/7/2", now()), Some(ymd(2024, 7, 2)));
        assert_eq!(
            parse_published_date("2024-07-20 10:30:00", now()),
            Some(ymd(2024, 7, 20))
        );
    }

    #[test]
    fn cjk_dates() {
        assert_eq!(parse_published_date("2024年07月20日", now()), Some(ymd(2024, 7, 20)));
        assert_eq!(
            parse_published_date("2024年7月20日 10:00", now()),
            Some(ymd(2024, 7, 20))
        );
    }

    #[test]
    fn english_month_names() {
        assert_eq!(parse_published_date("Jul 20, 2024", now()), Some(ymd(2024, 7, 20)));
    }

    #[test]
    fn day_first_when_year_trails() {
        assert_eq!(
            parse_published_date("15/07/2024 10:00:00", now()),
            Some(ymd(2024, 7, 15))
        );
        assert_eq!(
            parse_published_date("01/07/2024 10:00:00", now()),
            Some(ymd(2024, 7, 1))
        );
        // Only readable month first.
        assert_eq!(parse_published_date("07/15/2024", now()), Some(ymd(2024, 7, 15)));
        assert_eq!(parse_published_date("31/13/2024", now()), None);
    }

    #[test]
    fn compact_dates() {
        assert_eq!(parse_published_date("20240701", now()), Some(ymd(2024, 7, 1)));
        assert_eq!(parse_published_date("20240701 08:30", now()), Some(ymd(2024, 7, 1)));
        assert_eq!(parse_published_date("20241301", now()), None);
    }

    #[test]
    fn month_names_followed_by_time() {
        assert_eq!(parse_published_date("Jul 1, 2024 10:00", now()), Some(ymd(2024, 7, 1)));
        assert_eq!(
            parse_published_date("20 July 2024, 09:15 UTC", now()),
            Some(ymd(2024, 7, 20))
        );
    }

    #[test]
    fn relative_time_is_anchored_on_now() {
        assert_eq!(parse_published_date("13 小时前", now()), Some(ymd(2024, 7, 23)));
        let dt = parse_relative_time("2 小时 5 分钟前", now()).unwrap();
        assert_eq!(dt, now() - Duration::minutes(125));
    }

    #[test]
    fn unparsable_is_none() {
        assert_eq!(parse_published_date("", now()), None);
        assert_eq!(parse_published_date("yesterday-ish", now()), None);
        assert_eq!(parse_published_date("2024-13-45", now()), None);
    }

    #[test]
    fn clean_text_strips_markup() {
        assert_eq!(clean_text("  <b>Sys&nbsp;upgrade</b>\n  done "), "Sys upgrade done");
    }
}
