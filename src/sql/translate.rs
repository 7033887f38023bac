//! Dialect function translation.
//!
//! Date/time and paging idioms written for one dialect are recognized and
//! re-emitted in the target dialect's form:
//! - year / month / day / week extraction
//! - current date and current timestamp
//! - interval arithmetic (`x ± INTERVAL n UNIT`, `DATEADD`, `DATE_ADD`, SQLite modifiers)
//! - truncation to day / week / month / year
//! - `LIMIT n` ↔ `TOP n`
//!
//! Function calls are located with an anchored regex and their arguments are
//! split with a paren- and quote-aware scanner, so nested calls and string
//! arguments survive. Matches that start inside a string literal are left
//! alone. Every idiom renders to a form that parses back to itself, and
//! [`FunctionTranslator::translate`] runs the rules to a fixpoint, so
//! translating twice gives the same text as translating once.

use super::Dialect;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

const MAX_PASSES: usize = 8;

lazy_static! {
    static ref CALL_START: Regex = Regex::new(
        r"(?i)\b(STRFTIME|EXTRACT|DATEPART|DATEADD|DATE_ADD|DATE_SUB|DATE_TRUNC|DATETRUNC|DATE_FORMAT|DATETIME|DATE|YEAR|MONTH|DAY|WEEK|CURDATE|NOW|GETDATE|SYSDATETIME|CAST)\s*\("
    )
    .unwrap();
    static ref CALL_HEAD: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap();
    static ref CLOCK_KEYWORD: Regex =
        Regex::new(r"(?i)\b(CURRENT_DATE|CURRENT_TIMESTAMP)\b(?:\s*\(\s*\))?").unwrap();
    static ref INFIX_INTERVAL: Regex = Regex::new(
        r"(?i)([+-])\s*(INTERVAL\s+(?:'\s*[+-]?\d+\s*'\s*[a-z]+|'\s*[+-]?\d+\s+[a-z]+\s*'|[+-]?\d+\s+[a-z]+))"
    )
    .unwrap();
    static ref INTERVAL: Regex = Regex::new(
        r"(?is)^INTERVAL\s+(?:'\s*([+-]?\d+)\s*'\s*([a-z]+)|'\s*([+-]?\d+)\s+([a-z]+)\s*'|([+-]?\d+)\s+([a-z]+))$"
    )
    .unwrap();
    static ref WEEKDAY_INTERVAL: Regex = Regex::new(r"(?is)^INTERVAL\s+(.+?)\s+DAY$").unwrap();
    static ref SQLITE_MODIFIER: Regex = Regex::new(r"(?i)^'\s*([+-]?\d+)\s+([a-z]+)\s*'$").unwrap();
    static ref EXTRACT_ARGS: Regex = Regex::new(r"(?is)^(YEAR|MONTH|DAY|WEEK)\s+FROM\s+(.+)$").unwrap();
    static ref CAST_AS_DATE: Regex = Regex::new(r"(?is)^(.+?)\s+AS\s+DATE$").unwrap();
    static ref MSSQL_WEEKDAY_OFFSET: Regex = Regex::new(
        r"(?is)^-\s*\(\s*\(\s*DATEPART\s*\(\s*weekday\s*,\s*(.+?)\s*\)\s*\+\s*@@DATEFIRST\s*-\s*2\s*\)\s*%\s*7\s*\)$"
    )
    .unwrap();
    static ref TRAILING_LIMIT: Regex = Regex::new(r"(?is)^(.*?)\s+LIMIT\s+(\d+)\s*;?\s*$").unwrap();
    static ref LEADING_SELECT: Regex = Regex::new(r"(?is)^(\s*SELECT\s+)(DISTINCT\s+)?").unwrap();
    static ref HAS_TOP: Regex = Regex::new(r"(?is)^\s*SELECT\s+(?:DISTINCT\s+)?TOP\b").unwrap();
    static ref LEADING_TOP: Regex =
        Regex::new(r"(?is)^(\s*SELECT\s+)(DISTINCT\s+)?TOP\s*\(?\s*(\d+)\s*\)?\s+(.*?)\s*(;?)\s*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePart {
    Year,
    Month,
    Day,
    Week,
}

/// Whether a value carries a time of day (`Now`) or only a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    Date,
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalUnit {
    Day,
    Week,
    Month,
    Year,
    Hour,
    Minute,
    Second,
}

impl IntervalUnit {
    fn keyword(&self) -> &'static str {
        match self {
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Second => "second",
        }
    }

    fn is_sub_day(&self) -> bool {
        matches!(self, IntervalUnit::Hour | IntervalUnit::Minute | IntervalUnit::Second)
    }
}

/// A recognized dialect-specific expression, independent of spelling.
#[derive(Debug, Clone, PartialEq)]
enum Idiom {
    Extract { part: DatePart, arg: String },
    Clock(Clock),
    Shift {
        unit: IntervalUnit,
        amount: i64,
        base: String,
        clock: Clock,
    },
    Truncate { part: DatePart, arg: String },
}

/// Rewrites SQL text into the idioms of one target dialect.
#[derive(Debug, Clone, Copy)]
pub struct FunctionTranslator {
    target: Dialect,
}

impl FunctionTranslator {
    pub fn new(target: Dialect) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Dialect {
        self.target
    }

    pub fn translate(&self, sql: &str) -> String {
        let mut current = sql.to_string();
        for pass in 0..MAX_PASSES {
            let next = self.rewrite_row_limit(&self.rewrite_expr(&current));
            if next == current {
                break;
            }
            debug!("Translation pass {} for {:?}: {}", pass + 1, self.target, next);
            current = next;
        }
        current
    }

    fn rewrite_expr(&self, sql: &str) -> String {
        let sql = self.rewrite_clock_keywords(sql);
        let sql = self.rewrite_calls(&sql);
        self.rewrite_infix_intervals(&sql)
    }

    fn rewrite_clock_keywords(&self, sql: &str) -> String {
        let spans = literal_spans(sql);
        CLOCK_KEYWORD
            .replace_all(sql, |caps: &Captures| {
                let whole = &caps[0];
                let start = caps.get(0).map_or(0, |m| m.start());
                if in_literal(&spans, start) || !is_anchored(sql, start) {
                    return whole.to_string();
                }
                let clock = if caps[1].eq_ignore_ascii_case("CURRENT_DATE") {
                    Clock::Date
                } else {
                    Clock::Now
                };
                self.render_clock(clock)
            })
            .into_owned()
    }

    fn rewrite_calls(&self, sql: &str) -> String {
        let spans = literal_spans(sql);
        let mut out = String::with_capacity(sql.len());
        let mut cursor = 0;
        let mut search = 0;

        while let Some(caps) = CALL_START.captures_at(sql, search) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let open = whole.end() - 1;
            if in_literal(&spans, whole.start()) || !is_anchored(sql, whole.start()) {
                search = whole.end();
                continue;
            }
            let Some(close) = find_closing(sql, open) else {
                search = whole.end();
                continue;
            };

            let original = &sql[whole.start()..=close];
            let args = split_args(&sql[open + 1..close]);
            let rendered = parse_call(name.as_str(), &args).and_then(|idiom| self.render(&idiom));
            match rendered {
                Some(rendered) if rendered != original => {
                    out.push_str(&sql[cursor..whole.start()]);
                    out.push_str(&rendered);
                    cursor = close + 1;
                    search = close + 1;
                }
                _ => search = whole.end(),
            }
        }
        out.push_str(&sql[cursor..]);
        out
    }

    /// `operand ± INTERVAL n UNIT` becomes the target's additive date function.
    fn rewrite_infix_intervals(&self, sql: &str) -> String {
        let mut sql = sql.to_string();
        let mut search = 0;

        while let Some(caps) = INFIX_INTERVAL.captures_at(&sql, search) {
            let (Some(whole), Some(sign), Some(interval)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                break;
            };
            let spans = literal_spans(&sql);
            let parsed = parse_interval(interval.as_str());
            let start = operand_start(&sql, whole.start());
            let (Some((amount, unit)), Some(start), false) = (parsed, start, in_literal(&spans, whole.start()))
            else {
                search = whole.end();
                continue;
            };

            let amount = if sign.as_str() == "-" { amount.checked_neg() } else { Some(amount) };
            let base = sql[start..whole.start()].trim_end().to_string();
            let rendered = amount.and_then(|amount| {
                self.render(&Idiom::Shift {
                    unit,
                    amount,
                    clock: clock_of(&base, unit),
                    base,
                })
            });
            let Some(rendered) = rendered else {
                debug!("Interval amount out of range left in place: {}", whole.as_str());
                search = whole.end();
                continue;
            };
            let end = whole.end();
            sql = format!("{}{}{}", &sql[..start], rendered, &sql[end..]);
            search = start + rendered.len();
        }
        sql
    }

    fn rewrite_row_limit(&self, sql: &str) -> String {
        match self.target {
            Dialect::SqlServer => {
                let Some(caps) = TRAILING_LIMIT.captures(sql) else {
                    return sql.to_string();
                };
                let body = caps.get(1).map_or("", |m| m.as_str());
                let limit = caps.get(2).map_or("", |m| m.as_str());
                if HAS_TOP.is_match(body) {
                    return body.to_string();
                }
                if !LEADING_SELECT.is_match(body) {
                    debug!("LIMIT without a leading SELECT left in place");
                    return sql.to_string();
                }
                LEADING_SELECT
                    .replacen(body, 1, |c: &Captures| {
                        format!(
                            "{}{}TOP {} ",
                            &c[1],
                            c.get(2).map_or("", |m| m.as_str()),
                            limit
                        )
                    })
                    .into_owned()
            }
            Dialect::Sqlite | Dialect::MySql => LEADING_TOP
                .replacen(sql, 1, "${1}${2}${4} LIMIT ${3}${5}")
                .into_owned(),
        }
    }

    /// `None` when the idiom has no representable form in the target.
    fn render(&self, idiom: &Idiom) -> Option<String> {
        match idiom {
            Idiom::Extract { part, arg } => Some(self.render_extract(*part, &self.operand(arg))),
            Idiom::Clock(clock) => Some(self.render_clock(*clock)),
            Idiom::Shift {
                unit,
                amount,
                base,
                clock,
            } => self.render_shift(*unit, *amount, &self.operand(base), *clock),
            Idiom::Truncate { part, arg } => Some(self.render_truncate(*part, &self.operand(arg))),
        }
    }

    /// Translate an argument. SQLite keeps the `'now'` time value; other
    /// targets spell it as their current-timestamp function.
    fn operand(&self, arg: &str) -> String {
        let arg = arg.trim();
        if is_now_literal(arg) {
            return match self.target {
                Dialect::Sqlite => "'now'".to_string(),
                _ => self.render_clock(Clock::Now),
            };
        }
        let rewritten = self.rewrite_expr(arg);
        if self.target == Dialect::Sqlite
            && (rewritten.eq_ignore_ascii_case("date('now')") || rewritten.eq_ignore_ascii_case("datetime('now')"))
        {
            return "'now'".to_string();
        }
        rewritten
    }

    fn render_extract(&self, part: DatePart, arg: &str) -> String {
        match (self.target, part) {
            (Dialect::Sqlite, DatePart::Year) => format!("strftime('%Y', {})", arg),
            (Dialect::Sqlite, DatePart::Month) => format!("strftime('%m', {})", arg),
            (Dialect::Sqlite, DatePart::Day) => format!("strftime('%d', {})", arg),
            (Dialect::Sqlite, DatePart::Week) => format!("strftime('%W', {})", arg),
            (_, DatePart::Year) => format!("YEAR({})", arg),
            (_, DatePart::Month) => format!("MONTH({})", arg),
            (_, DatePart::Day) => format!("DAY({})", arg),
            (Dialect::SqlServer, DatePart::Week) => format!("DATEPART(week, {})", arg),
            (Dialect::MySql, DatePart::Week) => format!("WEEK({})", arg),
        }
    }

    fn render_clock(&self, clock: Clock) -> String {
        let text = match (self.target, clock) {
            (Dialect::Sqlite, Clock::Date) => "date('now')",
            (Dialect::Sqlite, Clock::Now) => "datetime('now')",
            (Dialect::SqlServer, Clock::Date) => "CAST(GETDATE() AS DATE)",
            (Dialect::SqlServer, Clock::Now) => "GETDATE()",
            (Dialect::MySql, Clock::Date) => "CURDATE()",
            (Dialect::MySql, Clock::Now) => "NOW()",
        };
        text.to_string()
    }

    fn render_shift(&self, unit: IntervalUnit, amount: i64, base: &str, clock: Clock) -> Option<String> {
        let rendered = match self.target {
            Dialect::Sqlite => {
                // SQLite has no week modifier
                let (unit, amount) = match unit {
                    IntervalUnit::Week => (IntervalUnit::Day, amount.checked_mul(7)?),
                    other => (other, amount),
                };
                // date() drops the time of day
                let function = if clock == Clock::Now || unit.is_sub_day() {
                    "datetime"
                } else {
                    "date"
                };
                format!("{}({}, '{:+} {}s')", function, base, amount, unit.keyword())
            }
            Dialect::SqlServer => format!("DATEADD({}, {}, {})", unit.keyword(), amount, base),
            Dialect::MySql => format!(
                "DATE_ADD({}, INTERVAL {} {})",
                base,
                amount,
                unit.keyword().to_ascii_uppercase()
            ),
        };
        Some(rendered)
    }

    fn render_truncate(&self, part: DatePart, arg: &str) -> String {
        match (self.target, part) {
            (Dialect::Sqlite, DatePart::Year) => format!("date({}, 'start of year')", arg),
            (Dialect::Sqlite, DatePart::Month) => format!("date({}, 'start of month')", arg),
            (Dialect::Sqlite, DatePart::Week) => format!("date({}, 'weekday 0', '-6 days')", arg),
            (Dialect::Sqlite, DatePart::Day) => format!("date({})", arg),
            // DATEDIFF(week) counts Sunday boundaries, so weeks are aligned
            // to Monday through DATEPART(weekday) and @@DATEFIRST instead
            (Dialect::SqlServer, DatePart::Week) => format!(
                "DATEADD(day, -((DATEPART(weekday, {}) + @@DATEFIRST - 2) % 7), CAST({} AS DATE))",
                arg, arg
            ),
            (Dialect::SqlServer, part) => {
                let unit = part_keyword(part);
                format!("DATEADD({}, DATEDIFF({}, 0, {}), 0)", unit, unit, arg)
            }
            (Dialect::MySql, DatePart::Year) => format!("DATE_FORMAT({}, '%Y-01-01')", arg),
            (Dialect::MySql, DatePart::Month) => format!("DATE_FORMAT({}, '%Y-%m-01')", arg),
            (Dialect::MySql, DatePart::Week) => {
                format!("DATE_SUB(DATE({}), INTERVAL WEEKDAY({}) DAY)", arg, arg)
            }
            (Dialect::MySql, DatePart::Day) => format!("DATE({})", arg),
        }
    }
}

fn part_keyword(part: DatePart) -> &'static str {
    match part {
        DatePart::Year => "year",
        DatePart::Month => "month",
        DatePart::Day => "day",
        DatePart::Week => "week",
    }
}

fn parse_call(name: &str, args: &[String]) -> Option<Idiom> {
    let name = name.to_ascii_uppercase();
    match (name.as_str(), args) {
        ("YEAR" | "MONTH" | "DAY" | "WEEK", [arg]) if !arg.is_empty() => Some(Idiom::Extract {
            part: parse_part(&name)?,
            arg: arg.clone(),
        }),
        ("STRFTIME", [format, arg]) => {
            let part = match format.as_str() {
                "'%Y'" => DatePart::Year,
                "'%m'" => DatePart::Month,
                "'%d'" => DatePart::Day,
                "'%W'" => DatePart::Week,
                _ => return None,
            };
            Some(Idiom::Extract { part, arg: arg.clone() })
        }
        ("EXTRACT", [body]) => {
            let caps = EXTRACT_ARGS.captures(body)?;
            Some(Idiom::Extract {
                part: parse_part(&caps[1])?,
                arg: caps[2].trim().to_string(),
            })
        }
        ("DATEPART", [part, arg]) => Some(Idiom::Extract {
            part: parse_part(part)?,
            arg: arg.clone(),
        }),
        ("CURDATE", []) => Some(Idiom::Clock(Clock::Date)),
        ("NOW" | "GETDATE" | "SYSDATETIME", []) => Some(Idiom::Clock(Clock::Now)),
        ("CAST", [body]) => {
            let caps = CAST_AS_DATE.captures(body)?;
            is_now_clock(caps[1].trim()).then_some(Idiom::Clock(Clock::Date))
        }
        ("DATE", _) => parse_sqlite_date(args, Clock::Date),
        ("DATETIME", _) => parse_sqlite_date(args, Clock::Now),
        ("DATEADD", [unit, amount, base]) => parse_dateadd(unit, amount, base),
        ("DATE_ADD", [base, interval]) => {
            let (amount, unit) = parse_interval(interval)?;
            Some(Idiom::Shift {
                unit,
                amount,
                base: base.clone(),
                clock: clock_of(base, unit),
            })
        }
        ("DATE_SUB", [base, interval]) => {
            if let Some(arg) = mysql_week_start(base, interval) {
                return Some(Idiom::Truncate {
                    part: DatePart::Week,
                    arg,
                });
            }
            let (amount, unit) = parse_interval(interval)?;
            Some(Idiom::Shift {
                unit,
                amount: amount.checked_neg()?,
                base: base.clone(),
                clock: clock_of(base, unit),
            })
        }
        ("DATE_TRUNC" | "DATETRUNC", [unit, arg]) => Some(Idiom::Truncate {
            part: parse_part(unit)?,
            arg: arg.clone(),
        }),
        ("DATE_FORMAT", [arg, format]) => {
            let part = match format.as_str() {
                "'%Y-%m-01'" => DatePart::Month,
                "'%Y-01-01'" => DatePart::Year,
                _ => return None,
            };
            Some(Idiom::Truncate { part, arg: arg.clone() })
        }
        _ => None,
    }
}

/// SQLite `date(...)` / `datetime(...)` forms.
fn parse_sqlite_date(args: &[String], clock: Clock) -> Option<Idiom> {
    match args {
        [arg] if is_now_literal(arg) => Some(Idiom::Clock(clock)),
        [arg] if clock == Clock::Date && !arg.is_empty() => Some(Idiom::Truncate {
            part: DatePart::Day,
            arg: arg.clone(),
        }),
        [base, modifier] => {
            let start_of = match modifier.to_ascii_lowercase().as_str() {
                "'start of year'" => Some(DatePart::Year),
                "'start of month'" => Some(DatePart::Month),
                "'start of day'" => Some(DatePart::Day),
                _ => None,
            };
            if let Some(part) = start_of {
                return Some(Idiom::Truncate { part, arg: base.clone() });
            }

            let caps = SQLITE_MODIFIER.captures(modifier)?;
            let amount: i64 = caps[1].parse().ok()?;
            let unit = parse_unit(&caps[2])?;
            let base = if is_now_literal(base) {
                match clock {
                    Clock::Date => "CURRENT_DATE".to_string(),
                    Clock::Now => "CURRENT_TIMESTAMP".to_string(),
                }
            } else {
                base.clone()
            };
            Some(Idiom::Shift {
                unit,
                amount,
                base,
                clock,
            })
        }
        [arg, weekday, back]
            if clock == Clock::Date
                && weekday.eq_ignore_ascii_case("'weekday 0'")
                && back.eq_ignore_ascii_case("'-6 days'") =>
        {
            Some(Idiom::Truncate {
                part: DatePart::Week,
                arg: arg.clone(),
            })
        }
        _ => None,
    }
}

/// `DATEADD(unit, n, x)` shifts; `DATEADD(unit, DATEDIFF(unit, 0, x), 0)`
/// and the Monday-aligned weekday offset truncate.
fn parse_dateadd(unit: &str, amount: &str, base: &str) -> Option<Idiom> {
    if let Ok(n) = amount.replace(' ', "").parse::<i64>() {
        let unit = parse_unit(unit)?;
        return Some(Idiom::Shift {
            unit,
            amount: n,
            base: base.to_string(),
            clock: clock_of(base, unit),
        });
    }
    if let Some(arg) = mssql_week_start(unit, amount, base) {
        return Some(Idiom::Truncate {
            part: DatePart::Week,
            arg,
        });
    }

    let part = parse_part(unit)?;
    if base.trim() != "0" {
        return None;
    }
    let (name, inner) = call_parts(amount)?;
    if !name.eq_ignore_ascii_case("DATEDIFF") {
        return None;
    }
    match split_args(inner).as_slice() {
        [inner_unit, zero, arg] if zero == "0" && parse_part(inner_unit) == Some(part) => {
            Some(Idiom::Truncate { part, arg: arg.clone() })
        }
        _ => None,
    }
}

/// `DATEADD(day, -((DATEPART(weekday, x) + @@DATEFIRST - 2) % 7), CAST(x AS DATE))` → `x`.
fn mssql_week_start(unit: &str, offset: &str, base: &str) -> Option<String> {
    if parse_unit(unit)? != IntervalUnit::Day {
        return None;
    }
    let weekday_arg = MSSQL_WEEKDAY_OFFSET.captures(offset.trim())?.get(1)?.as_str().trim();
    let (cast_name, cast_body) = call_parts(base)?;
    if !cast_name.eq_ignore_ascii_case("CAST") {
        return None;
    }
    let caps = CAST_AS_DATE.captures(cast_body.trim())?;
    let cast_arg = caps.get(1)?.as_str().trim();
    (cast_arg == weekday_arg).then(|| cast_arg.to_string())
}

/// `DATE_SUB(DATE(x), INTERVAL WEEKDAY(x) DAY)` → the `x` of a week truncation.
fn mysql_week_start(base: &str, interval: &str) -> Option<String> {
    let (date_name, date_arg) = call_parts(base)?;
    if !date_name.eq_ignore_ascii_case("DATE") {
        return None;
    }
    let caps = WEEKDAY_INTERVAL.captures(interval.trim())?;
    let offset = caps.get(1)?.as_str();
    let (weekday_name, weekday_arg) = call_parts(offset)?;
    if !weekday_name.eq_ignore_ascii_case("WEEKDAY") || weekday_arg.trim() != date_arg.trim() {
        return None;
    }
    Some(date_arg.trim().to_string())
}

fn parse_part(name: &str) -> Option<DatePart> {
    match name.trim().trim_matches('\'').to_ascii_lowercase().as_str() {
        "year" | "yy" | "yyyy" => Some(DatePart::Year),
        "month" | "mm" | "m" => Some(DatePart::Month),
        "day" | "dd" | "d" => Some(DatePart::Day),
        "week" | "wk" | "ww" => Some(DatePart::Week),
        _ => None,
    }
}

fn parse_unit(name: &str) -> Option<IntervalUnit> {
    match name.trim().trim_matches('\'').to_ascii_lowercase().as_str() {
        "day" | "days" | "dd" | "d" => Some(IntervalUnit::Day),
        "week" | "weeks" | "wk" | "ww" => Some(IntervalUnit::Week),
        "month" | "months" | "mm" | "m" => Some(IntervalUnit::Month),
        "year" | "years" | "yy" | "yyyy" => Some(IntervalUnit::Year),
        "hour" | "hours" | "hh" => Some(IntervalUnit::Hour),
        "minute" | "minutes" | "mi" | "n" => Some(IntervalUnit::Minute),
        "second" | "seconds" | "ss" | "s" => Some(IntervalUnit::Second),
        _ => None,
    }
}

fn parse_interval(text: &str) -> Option<(i64, IntervalUnit)> {
    let caps = INTERVAL.captures(text.trim())?;
    let (amount, unit) = [(1, 2), (3, 4), (5, 6)]
        .iter()
        .find_map(|&(a, u)| Some((caps.get(a)?.as_str(), caps.get(u)?.as_str())))?;
    Some((amount.parse().ok()?, parse_unit(unit)?))
}

/// Clock kind of a shift base: timestamps stay timestamps after shifting.
fn clock_of(base: &str, unit: IntervalUnit) -> Clock {
    let base = base.trim();
    if unit.is_sub_day() || is_now_clock(base) {
        return Clock::Now;
    }
    let Some((name, inner)) = call_parts(base) else {
        return Clock::Date;
    };
    if name.eq_ignore_ascii_case("DATETIME") {
        return Clock::Now;
    }
    match parse_call(name, &split_args(inner)) {
        Some(Idiom::Shift { clock, .. }) => clock,
        _ => Clock::Date,
    }
}

fn is_now_literal(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("'now'")
}

fn is_now_clock(expr: &str) -> bool {
    if expr.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return true;
    }
    match call_parts(expr) {
        Some((name, inner)) => {
            let name = name.to_ascii_uppercase();
            (matches!(name.as_str(), "NOW" | "GETDATE" | "SYSDATETIME") && inner.trim().is_empty())
                || (name == "DATETIME" && is_now_literal(inner))
        }
        None => false,
    }
}

/// Name and argument text of `expr` when the whole expression is one call.
fn call_parts(expr: &str) -> Option<(&str, &str)> {
    let expr = expr.trim();
    let caps = CALL_HEAD.captures(expr)?;
    let name = caps.get(1)?.as_str();
    let open = caps.get(0)?.end() - 1;
    let close = find_closing(expr, open)?;
    (close == expr.len() - 1).then(|| (name, &expr[open + 1..close]))
}

/// Rejects matches glued to a qualifier or quoted identifier.
fn is_anchored(sql: &str, start: usize) -> bool {
    !matches!(
        sql[..start].bytes().last(),
        Some(b'.') | Some(b'[') | Some(b'"') | Some(b'`') | Some(b'@')
    )
}

/// Byte ranges `(open, close)` of single-quoted literals, quotes included.
pub(crate) fn literal_spans(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            let close = skip_quoted(bytes, i).unwrap_or(bytes.len());
            spans.push((i, close));
            i = close;
        }
        i += 1;
    }
    spans
}

pub(crate) fn in_literal(spans: &[(usize, usize)], pos: usize) -> bool {
    spans.iter().any(|&(open, close)| open < pos && pos < close)
}

/// Index of the quote closing the one at `start`; doubled quotes are escapes.
fn skip_quoted(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_closing(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i)?,
            b'[' => i += bytes[i..].iter().position(|&b| b == b']')?,
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split call arguments at top-level commas.
fn split_args(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    let bytes = inner.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i).unwrap_or(bytes.len()),
            b'[' => {
                i += bytes[i..].iter().position(|&b| b == b']').unwrap_or(bytes.len() - i);
            }
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(inner[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    args.push(inner[start.min(inner.len())..].trim().to_string());
    args
}

fn is_operand_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b >= 0x80
}

/// Start of the expression immediately left of `end`: a call, a literal,
/// a quoted identifier or a plain (possibly dotted) name.
fn operand_start(sql: &str, end: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = end;
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    let stop = i;
    let last = *bytes.get(i.checked_sub(1)?)?;

    match last {
        b')' => {
            let mut depth = 0usize;
            let mut j = i;
            loop {
                if j == 0 {
                    return None;
                }
                j -= 1;
                match bytes[j] {
                    b')' => depth += 1,
                    b'(' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    b'\'' => j = rfind_quote(bytes, j)?,
                    _ => {}
                }
            }
            i = j;
            while i > 0 && is_operand_byte(bytes[i - 1]) {
                i -= 1;
            }
        }
        b'\'' => i = rfind_quote(bytes, i - 1)?,
        b']' => i = bytes[..i - 1].iter().rposition(|&b| b == b'[')?,
        b'`' | b'"' => i = bytes[..i - 1].iter().rposition(|&b| b == last)?,
        b if is_operand_byte(b) => {
            while i > 0 && is_operand_byte(bytes[i - 1]) {
                i -= 1;
            }
        }
        _ => return None,
    }
    (i < stop).then_some(i)
}

/// Opening quote of the literal whose closing quote is at `close`.
fn rfind_quote(bytes: &[u8], close: usize) -> Option<usize> {
    let mut j = close;
    loop {
        let k = bytes[..j].iter().rposition(|&b| b == b'\'')?;
        if k > 0 && bytes[k - 1] == b'\'' {
            j = k - 1;
            continue;
        }
        return Some(k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite() -> FunctionTranslator {
        FunctionTranslator::new(Dialect::Sqlite)
    }

    fn mssql() -> FunctionTranslator {
        FunctionTranslator::new(Dialect::SqlServer)
    }

    fn mysql() -> FunctionTranslator {
        FunctionTranslator::new(Dialect::MySql)
    }

    #[test]
    fn test_limit_becomes_top() {
        let sql = "SELECT a, b FROM t WHERE x = 1 LIMIT 5";
        assert_eq!(mssql().translate(sql), "SELECT TOP 5 a, b FROM t WHERE x = 1");
        assert_eq!(mssql().translate("SELECT a FROM t LIMIT 5;"), "SELECT TOP 5 a FROM t");
        assert_eq!(
            mssql().translate("SELECT DISTINCT a FROM t LIMIT 3"),
            "SELECT DISTINCT TOP 3 a FROM t"
        );
        assert_eq!(mssql().translate("SELECT TOP 3 a FROM t LIMIT 5"), "SELECT TOP 3 a FROM t");
    }

    #[test]
    fn test_top_becomes_limit() {
        assert_eq!(
            sqlite().translate("SELECT TOP 10 * FROM Orders;"),
            "SELECT * FROM Orders LIMIT 10;"
        );
        assert_eq!(mysql().translate("SELECT TOP 2 a FROM t"), "SELECT a FROM t LIMIT 2");
    }

    #[test]
    fn test_year_extraction() {
        assert_eq!(mssql().translate("YEAR(c)"), "YEAR(c)");
        assert_eq!(mssql().translate("strftime('%Y', c)"), "YEAR(c)");
        assert_eq!(mssql().translate("EXTRACT(YEAR FROM c)"), "YEAR(c)");
        assert_eq!(sqlite().translate("YEAR(c)"), "strftime('%Y', c)");
        assert_eq!(mysql().translate("DATEPART(yyyy, c)"), "YEAR(c)");
        assert_eq!(mssql().translate("WEEK(c)"), "DATEPART(week, c)");
        assert_eq!(sqlite().translate("MONTH(o.created)"), "strftime('%m', o.created)");
    }

    #[test]
    fn test_clock_functions() {
        assert_eq!(mssql().translate("SELECT CURRENT_DATE"), "SELECT CAST(GETDATE() AS DATE)");
        assert_eq!(sqlite().translate("SELECT NOW(), CURDATE()"), "SELECT datetime('now'), date('now')");
        assert_eq!(mysql().translate("SELECT date('now')"), "SELECT CURDATE()");
        assert_eq!(sqlite().translate("YEAR(CURRENT_DATE)"), "strftime('%Y', 'now')");
        assert_eq!(mssql().translate("strftime('%Y', 'now')"), "YEAR(GETDATE())");
    }

    #[test]
    fn test_interval_arithmetic() {
        let sql = "SELECT * FROM o WHERE d >= NOW() - INTERVAL 7 DAY";
        assert_eq!(
            sqlite().translate(sql),
            "SELECT * FROM o WHERE d >= datetime('now', '-7 days')"
        );
        assert_eq!(
            mssql().translate(sql),
            "SELECT * FROM o WHERE d >= DATEADD(day, -7, GETDATE())"
        );
        assert_eq!(
            mysql().translate(sql),
            "SELECT * FROM o WHERE d >= DATE_ADD(NOW(), INTERVAL -7 DAY)"
        );
        assert_eq!(sqlite().translate("d + INTERVAL '2 weeks'"), "date(d, '+14 days')");
        assert_eq!(mysql().translate("DATEADD(hour, 3, d)"), "DATE_ADD(d, INTERVAL 3 HOUR)");
        assert_eq!(sqlite().translate("DATE_SUB(d, INTERVAL 1 YEAR)"), "date(d, '-1 years')");
        assert_eq!(
            mssql().translate("date('now', '-30 days')"),
            "DATEADD(day, -30, CAST(GETDATE() AS DATE))"
        );
    }

    #[test]
    fn test_timestamp_shift_keeps_time_of_day() {
        assert_eq!(
            sqlite().translate("SELECT * FROM t WHERE created >= datetime('now', '-1 day')"),
            "SELECT * FROM t WHERE created >= datetime('now', '-1 days')"
        );
        assert_eq!(
            sqlite().translate("datetime(created, '+7 days')"),
            "datetime(created, '+7 days')"
        );
        assert_eq!(
            sqlite().translate("DATE_ADD(NOW(), INTERVAL -1 DAY)"),
            "datetime('now', '-1 days')"
        );
        assert_eq!(
            sqlite().translate("DATEADD(week, 1, GETDATE())"),
            "datetime('now', '+7 days')"
        );
        assert_eq!(sqlite().translate("CURRENT_TIMESTAMP - INTERVAL 2 MONTH"), "datetime('now', '-2 months')");
        assert_eq!(sqlite().translate("CURRENT_DATE - INTERVAL 2 MONTH"), "date('now', '-2 months')");
        assert_eq!(
            mssql().translate("datetime('now', '-1 day')"),
            "DATEADD(day, -1, GETDATE())"
        );
        assert_eq!(
            sqlite().translate("DATEADD(day, 1, DATEADD(hour, 2, d))"),
            "datetime(datetime(d, '+2 hours'), '+1 days')"
        );
    }

    #[test]
    fn test_out_of_range_amounts_left_untranslated() {
        let weeks = "SELECT * FROM t WHERE d < d0 + INTERVAL 9223372036854775807 WEEK";
        assert_eq!(sqlite().translate(weeks), weeks);
        assert_eq!(
            mssql().translate(weeks),
            "SELECT * FROM t WHERE d < DATEADD(week, 9223372036854775807, d0)"
        );

        let sub = "DATE_SUB(d, INTERVAL -9223372036854775808 DAY)";
        assert_eq!(mssql().translate(sub), sub);
        assert_eq!(sqlite().translate(sub), sub);

        let minus = "d0 - INTERVAL -9223372036854775808 DAY";
        assert_eq!(mysql().translate(minus), minus);
        let dateadd = "DATEADD(week, -9223372036854775808, d0)";
        assert_eq!(sqlite().translate(dateadd), dateadd);
    }

    #[test]
    fn test_sqlserver_week_starts_on_monday() {
        let monday_aligned = "DATEADD(day, -((DATEPART(weekday, created) + @@DATEFIRST - 2) % 7), CAST(created AS DATE))";
        assert_eq!(mssql().translate("DATE_TRUNC('week', created)"), monday_aligned);
        assert_eq!(mssql().translate("date(created, 'weekday 0', '-6 days')"), monday_aligned);
        assert_eq!(mssql().translate(monday_aligned), monday_aligned);
        assert_eq!(sqlite().translate(monday_aligned), "date(created, 'weekday 0', '-6 days')");
        assert_eq!(
            mysql().translate(monday_aligned),
            "DATE_SUB(DATE(created), INTERVAL WEEKDAY(created) DAY)"
        );
    }

    #[test]
    fn test_truncation() {
        let sql = "DATE_TRUNC('month', created)";
        assert_eq!(sqlite().translate(sql), "date(created, 'start of month')");
        assert_eq!(mssql().translate(sql), "DATEADD(month, DATEDIFF(month, 0, created), 0)");
        assert_eq!(mysql().translate(sql), "DATE_FORMAT(created, '%Y-%m-01')");
        assert_eq!(
            mysql().translate("date(created, 'weekday 0', '-6 days')"),
            "DATE_SUB(DATE(created), INTERVAL WEEKDAY(created) DAY)"
        );
        assert_eq!(sqlite().translate("DATE_FORMAT(created, '%Y-01-01')"), "date(created, 'start of year')");
    }

    #[test]
    fn test_lookalike_identifiers_untouched() {
        let sql = "SELECT birth_year, fiscal_year(d), yearly_total, t.NOW() FROM t";
        assert_eq!(sqlite().translate(sql), sql);
        assert_eq!(mssql().translate("SELECT [YEAR] FROM t"), "SELECT [YEAR] FROM t");
    }

    #[test]
    fn test_literals_untouched() {
        let sql = "SELECT 'YEAR(x) - INTERVAL 1 DAY' AS label FROM t";
        assert_eq!(sqlite().translate(sql), sql);
        assert_eq!(mssql().translate(sql), sql);
    }

    #[test]
    fn test_translation_is_idempotent() {
        let samples = [
            "SELECT strftime('%m', d), strftime('%W', d) FROM t",
            "SELECT DATEPART(week, d), EXTRACT(DAY FROM d) FROM t",
            "SELECT YEAR(CURDATE())",
            "SELECT * FROM t WHERE d > CURRENT_TIMESTAMP",
            "SELECT * FROM t WHERE d > CAST(GETDATE() AS DATE)",
            "SELECT * FROM t WHERE d < d0 + INTERVAL '3 months'",
            "SELECT * FROM t WHERE d < DATEADD(hour, 2, d0)",
            "SELECT * FROM t WHERE d < DATE_SUB(d0, INTERVAL 1 YEAR)",
            "SELECT * FROM t WHERE d < date(d0, '+1 months')",
            "SELECT * FROM t WHERE d < date('now', '-7 days')",
            "SELECT * FROM t WHERE d < datetime('now', '-1 day')",
            "SELECT * FROM t WHERE d < datetime(d0, '+7 days')",
            "SELECT * FROM t WHERE d < DATE_ADD(NOW(), INTERVAL -1 DAY)",
            "SELECT * FROM t WHERE d < DATEADD(week, 2, GETDATE())",
            "SELECT DATE_TRUNC('week', d), DATE_TRUNC('day', d), DATE_TRUNC('year', d) FROM t",
            "SELECT a FROM t LIMIT 5",
            "SELECT TOP 3 a FROM t;",
            "SELECT COUNT(*) FROM Orders WHERE OrderDate >= NOW() - INTERVAL 1 WEEK",
        ];
        for target in [sqlite(), mssql(), mysql()] {
            for sample in samples {
                let once = target.translate(sample);
                assert_eq!(
                    target.translate(&once),
                    once,
                    "not idempotent for {:?} on {:?}",
                    sample,
                    target.target()
                );
            }
        }
    }

    #[test]
    fn test_split_args_respects_nesting() {
        assert_eq!(
            split_args("a, f(b, c), 'x,y'"),
            vec!["a".to_string(), "f(b, c)".to_string(), "'x,y'".to_string()]
        );
        assert!(split_args("  ").is_empty());
    }
}
