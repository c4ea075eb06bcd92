//! Filter to SQL compilation.
//!
//! Queries are assembled from [`Fragment`]s that carry their own positional
//! arguments, so arguments always follow the textual order of the `?`
//! placeholders regardless of which optional joins are present.
//!
//! Two shapes are produced:
//! - rows: aggregates over `page_view` or `event` rows (`v`), optionally
//!   joined with sessions collapsed per `(visitor_id, session_id)` (`s`)
//!   for bounces, entry/exit constraints and the bot threshold
//! - sessions: aggregates over `session` rows collapsed per session with
//!   `HAVING sum(sign) > 0`, used as soon as an entry/exit field is selected

use serde::Serialize;

use crate::error::{Error, Result};
use crate::field::{Affinity, Field, Total};
use crate::filter::{Filter, Platform};

/// Logical table a query reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    PageView,
    Session,
    Event,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::Session => "session",
            Self::Event => "event",
        }
    }
}

/// Positional query argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryArg {
    Str(String),
    UInt(u64),
    Int(i64),
}

/// Compiled query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub sql: String,
    pub args: Vec<QueryArg>,
}

#[derive(Debug, Clone, Default)]
struct Fragment {
    sql: String,
    args: Vec<QueryArg>,
}

impl Fragment {
    fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    fn bound(sql: impl Into<String>, args: Vec<QueryArg>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn append(&mut self, other: Fragment) {
        self.sql.push_str(&other.sql);
        self.args.extend(other.args);
    }

    fn join(parts: Vec<Fragment>, sep: &str) -> Fragment {
        let mut out = Fragment::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            out.append(part);
        }
        out
    }

    fn into_query(self) -> Query {
        Query {
            sql: self.sql,
            args: self.args,
        }
    }
}

/// Picks the logical table for a filter and field selection: `event` if
/// anything has event affinity, else `session` if anything needs session
/// state, else `page_view`.
pub fn table(filter: &Filter, fields: &[Field]) -> Table {
    if filter.has_event_filter() || fields.iter().any(|f| f.affinity == Affinity::Event) {
        Table::Event
    } else if filter.has_entry_exit()
        || filter.min_is_bot > 0
        || fields.iter().any(|f| f.affinity == Affinity::Session)
    {
        Table::Session
    } else {
        Table::PageView
    }
}

/// Compiles a filter and field selection into a parameterized query.
pub fn build(
    filter: &Filter,
    fields: &[Field],
    group_by: &[Field],
    order_by: &[Field],
) -> Result<Query> {
    if fields.is_empty() {
        return Err(Error::config("at least one field must be selected"));
    }
    let filter = filter.normalized()?;

    for g in group_by {
        if g.aggregate {
            return Err(Error::config(format!("cannot group by aggregate {}", g.name)));
        }
        if !fields.contains(g) {
            return Err(Error::config(format!("group by field {} is not selected", g.name)));
        }
    }
    if fields.iter().any(|f| f.aggregate) {
        if let Some(f) = fields.iter().find(|f| !f.aggregate && !group_by.contains(f)) {
            return Err(Error::config(format!("field {} must be grouped", f.name)));
        }
    }

    let mut q = if fields.iter().any(Field::session_only) {
        sessions_select(&filter, fields, group_by)?
    } else {
        rows_select(&filter, fields, group_by)?
    };
    q.append(order_and_limit(&filter, fields, group_by, order_by)?);
    Ok(q.into_query())
}

/// Average time on page per path for the given paths.
pub fn time_on_page(filter: &Filter, paths: &[String]) -> Result<Query> {
    let filter = filter.normalized()?;
    let mut q = Fragment::raw(
        "SELECT path, ifNull(toUInt64(avg(nullIf(time_on_page, 0))), 0) average_time_spent_seconds FROM (",
    );
    q.append(page_durations(&filter, paths));
    q.push_str(") GROUP BY path ORDER BY path ASC");
    Ok(q.into_query())
}

/// Average time on page over all pages matching the filter.
pub fn avg_time_on_page(filter: &Filter) -> Result<Query> {
    let filter = filter.normalized()?;
    let mut q = Fragment::raw(
        "SELECT ifNull(toUInt64(avg(nullIf(time_on_page, 0))), 0) average_time_spent_seconds FROM (",
    );
    q.append(page_durations(&filter, &[]));
    q.push_str(")");
    Ok(q.into_query())
}

/// Live sessions in the filter's time range. Only the client and the time
/// range apply; entry and exit rates are relative to this count.
pub fn total_sessions(filter: &Filter) -> Result<Query> {
    let filter = filter.normalized()?;
    let mut q = Fragment::raw("SELECT count(*) FROM (SELECT visitor_id, session_id FROM session WHERE ");
    q.append(Fragment::join(
        vec![client_clause(&filter, ""), time_clause(&filter, "time")],
        " AND ",
    ));
    q.push_str(" GROUP BY visitor_id, session_id HAVING sum(sign) > 0)");
    Ok(q.into_query())
}

/// Seconds until the next page view of the same session, per page view.
/// The last page view of a session has no successor and is left out.
fn page_durations(filter: &Filter, paths: &[String]) -> Fragment {
    let mut q = Fragment::raw(
        "SELECT path, dateDiff('second', time, neighbor(time, 1, time)) time_on_page FROM (SELECT v.session_id sid, v.path path, v.time time FROM page_view v",
    );
    if needs_session_join(filter, &[]) {
        q.push_str(" ");
        q.append(session_join(filter));
    }
    if filter.has_event_filter() {
        q.push_str(" ");
        q.append(event_join(filter));
    }
    let mut conditions = vec![client_clause(filter, "v."), time_clause(filter, "v.time")];
    conditions.extend(common_conditions(filter, "v."));
    q.push_str(" WHERE ");
    q.append(Fragment::join(conditions, " AND "));
    q.push_str(" ORDER BY v.visitor_id, v.session_id, v.time)");

    let mut outer = vec![
        Fragment::raw("time_on_page > 0"),
        Fragment::raw("sid = neighbor(sid, 1, null)"),
    ];
    outer.extend(path_conditions(filter, "path"));
    if !paths.is_empty() {
        outer.push(in_list("path", paths, false, false));
    }
    q.push_str(" WHERE ");
    q.append(Fragment::join(outer, " AND "));
    q
}

fn rows_select(filter: &Filter, fields: &[Field], group_by: &[Field]) -> Result<Fragment> {
    let base = if table(filter, fields) == Table::Event {
        Table::Event
    } else {
        Table::PageView
    };

    let mut projection = Vec::with_capacity(fields.len());
    for f in fields {
        let expr = f
            .rows
            .ok_or_else(|| Error::config(format!("field {} needs session rows", f.name)))?;
        projection.push(project(filter, expr, f));
    }

    let mut q = Fragment::raw("SELECT ");
    q.append(Fragment::join(projection, ", "));
    q.push_str(&format!(" FROM {} v", base.name()));
    if needs_session_join(filter, fields) {
        q.push_str(" ");
        q.append(session_join(filter));
    }

    let mut conditions = vec![client_clause(filter, "v."), time_clause(filter, "v.time")];
    conditions.extend(common_conditions(filter, "v."));
    conditions.extend(path_conditions(filter, "v.path"));
    if base == Table::Event {
        conditions.extend(event_conditions(filter, "v."));
    }
    conditions.extend(search_conditions(filter, |f| f.rows)?);
    q.push_str(" WHERE ");
    q.append(Fragment::join(conditions, " AND "));
    q.append(group_clause(group_by));
    Ok(q)
}

fn sessions_select(filter: &Filter, fields: &[Field], group_by: &[Field]) -> Result<Fragment> {
    let mut projection = Vec::with_capacity(fields.len());
    for f in fields {
        let expr = f.sessions.ok_or_else(|| {
            Error::config(format!("field {} cannot be combined with entry/exit fields", f.name))
        })?;
        projection.push(project(filter, expr, f));
    }

    let mut columns = vec!["visitor_id", "session_id"];
    for g in group_by {
        if let Some(col) = g.sessions {
            if !columns.contains(&col) {
                columns.push(col);
            }
        }
    }
    let columns = columns.join(", ");

    let mut conditions = vec![client_clause(filter, ""), time_clause(filter, "time")];
    conditions.extend(common_conditions(filter, ""));
    conditions.extend(entry_exit_conditions(filter));
    if filter.min_is_bot > 0 {
        conditions.push(bot_clause(filter));
    }
    conditions.extend(search_conditions(filter, |f| f.sessions)?);
    if filter.has_path_filter() {
        let mut semi = Fragment::raw(
            "(visitor_id, session_id) IN (SELECT visitor_id, session_id FROM page_view WHERE ",
        );
        let mut inner = vec![client_clause(filter, ""), time_clause(filter, "time")];
        inner.extend(path_conditions(filter, "path"));
        semi.append(Fragment::join(inner, " AND "));
        semi.push_str(")");
        conditions.push(semi);
    }
    if filter.has_event_filter() {
        let mut semi = Fragment::raw(
            "(visitor_id, session_id) IN (SELECT visitor_id, session_id FROM event WHERE ",
        );
        let mut inner = vec![client_clause(filter, ""), time_clause(filter, "time")];
        inner.extend(event_conditions(filter, ""));
        semi.append(Fragment::join(inner, " AND "));
        semi.push_str(")");
        conditions.push(semi);
    }

    let mut q = Fragment::raw("SELECT ");
    q.append(Fragment::join(projection, ", "));
    q.push_str(&format!(
        " FROM (SELECT {}, sum(sign) live, sum(page_views*sign) views_sum, sum(is_bounce*sign) bounced FROM session WHERE ",
        columns
    ));
    q.append(Fragment::join(conditions, " AND "));
    q.push_str(&format!(" GROUP BY {} HAVING sum(sign) > 0)", columns));
    q.append(group_clause(group_by));
    Ok(q)
}

fn project(filter: &Filter, expr: &str, field: &Field) -> Fragment {
    match field.total {
        Some(total) => {
            let mut f = Fragment::raw(format!("{} / greatest(", expr));
            f.append(total_subquery(filter, total));
            f.push_str(&format!(", 1) {}", field.name));
            f
        }
        None if expr == field.name => Fragment::raw(expr),
        None => Fragment::raw(format!("{} {}", expr, field.name)),
    }
}

fn total_subquery(filter: &Filter, total: Total) -> Fragment {
    let agg = match total {
        Total::Visitors => "uniq(visitor_id)",
        Total::Views => "count(*)",
    };
    let mut f = Fragment::raw(format!("(SELECT {} FROM page_view WHERE ", agg));
    f.append(Fragment::join(
        vec![client_clause(filter, ""), time_clause(filter, "time")],
        " AND ",
    ));
    f.push_str(")");
    f
}

fn group_clause(group_by: &[Field]) -> Fragment {
    if group_by.is_empty() {
        return Fragment::default();
    }
    let names: Vec<&str> = group_by.iter().map(|f| f.name).collect();
    Fragment::raw(format!(" GROUP BY {}", names.join(", ")))
}

fn order_and_limit(
    filter: &Filter,
    fields: &[Field],
    group_by: &[Field],
    order_by: &[Field],
) -> Result<Fragment> {
    let mut seen: Vec<&str> = Vec::new();
    let mut terms = Vec::new();

    for sort in &filter.sort {
        let field = Field::by_name(&sort.field)?;
        if !fields.contains(&field) {
            return Err(Error::config(format!("sort field {} is not selected", field.name)));
        }
        if !seen.contains(&field.name) {
            seen.push(field.name);
            terms.push(format!("{} {}", field.name, sort.direction.as_sql()));
        }
    }
    for field in order_by {
        if !fields.contains(field) {
            return Err(Error::config(format!("order field {} is not selected", field.name)));
        }
        if !seen.contains(&field.name) {
            seen.push(field.name);
            terms.push(format!("{} {}", field.name, field.direction.as_sql()));
        }
    }
    if let Some(first) = group_by.first() {
        if !seen.contains(&first.name) {
            terms.push(format!("{} ASC", first.name));
        }
    }

    let mut f = Fragment::default();
    if !terms.is_empty() {
        f.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }
    if filter.limit > 0 {
        f.append(Fragment::bound(
            " LIMIT ?",
            vec![QueryArg::UInt(filter.limit as u64)],
        ));
    }
    if filter.offset > 0 {
        f.append(Fragment::bound(
            " OFFSET ?",
            vec![QueryArg::UInt(filter.offset as u64)],
        ));
    }
    Ok(f)
}

fn needs_session_join(filter: &Filter, fields: &[Field]) -> bool {
    filter.min_is_bot > 0
        || filter.has_entry_exit()
        || fields.iter().any(|f| f.affinity == Affinity::Session)
}

fn session_join(filter: &Filter) -> Fragment {
    let mut conditions = vec![client_clause(filter, ""), time_clause(filter, "time")];
    conditions.extend(entry_exit_conditions(filter));
    if filter.min_is_bot > 0 {
        conditions.push(bot_clause(filter));
    }
    let mut f = Fragment::raw(
        "INNER JOIN (SELECT visitor_id, session_id, sum(is_bounce*sign) bounced FROM session WHERE ",
    );
    f.append(Fragment::join(conditions, " AND "));
    f.push_str(
        " GROUP BY visitor_id, session_id HAVING sum(sign) > 0) s ON v.visitor_id = s.visitor_id AND v.session_id = s.session_id",
    );
    f
}

fn event_join(filter: &Filter) -> Fragment {
    let mut conditions = vec![client_clause(filter, ""), time_clause(filter, "time")];
    conditions.extend(event_conditions(filter, ""));
    let mut f = Fragment::raw("INNER JOIN (SELECT visitor_id, session_id FROM event WHERE ");
    f.append(Fragment::join(conditions, " AND "));
    f.push_str(
        " GROUP BY visitor_id, session_id) ev ON v.visitor_id = ev.visitor_id AND v.session_id = ev.session_id",
    );
    f
}

fn client_clause(filter: &Filter, prefix: &str) -> Fragment {
    Fragment::bound(
        format!("{}client_id = ?", prefix),
        vec![QueryArg::UInt(filter.client_id)],
    )
}

fn bot_clause(filter: &Filter) -> Fragment {
    Fragment::bound("is_bot < ?", vec![QueryArg::UInt(filter.min_is_bot as u64)])
}

/// Day range in the filter's timezone, end exclusive; or an exact lower
/// bound when `from` is set.
fn time_clause(filter: &Filter, column: &str) -> Fragment {
    if let Some(from) = filter.from {
        return Fragment::bound(
            format!("{} >= fromUnixTimestamp64Milli(?)", column),
            vec![QueryArg::Int(from.timestamp_millis())],
        );
    }
    let start = filter.start.unwrap_or_default();
    let end = filter.end.unwrap_or(start);
    let end = end.succ_opt().unwrap_or(end);
    let tz = filter.timezone.name().to_string();
    Fragment::bound(
        format!(
            "{col} >= toDateTime(?, ?) AND {col} < toDateTime(?, ?)",
            col = column
        ),
        vec![
            QueryArg::Str(format!("{} 00:00:00", start.format("%Y-%m-%d"))),
            QueryArg::Str(tz.clone()),
            QueryArg::Str(format!("{} 00:00:00", end.format("%Y-%m-%d"))),
            QueryArg::Str(tz),
        ],
    )
}

/// `col IN (..)` for plain values; values prefixed with `!` go to `NOT IN`.
fn in_conditions(column: &str, values: &[String], numeric: bool) -> Vec<Fragment> {
    let (exclude, include): (Vec<&String>, Vec<&String>) =
        values.iter().partition(|v| v.starts_with('!'));
    let mut out = Vec::new();
    if !include.is_empty() {
        let include: Vec<String> = include.into_iter().cloned().collect();
        out.push(in_list(column, &include, numeric, false));
    }
    if !exclude.is_empty() {
        let exclude: Vec<String> = exclude
            .into_iter()
            .map(|v| v.trim_start_matches('!').to_string())
            .collect();
        out.push(in_list(column, &exclude, numeric, true));
    }
    out
}

fn in_list(column: &str, values: &[String], numeric: bool, negate: bool) -> Fragment {
    let placeholders = vec!["?"; values.len()].join(", ");
    let args = values
        .iter()
        .map(|v| match (numeric, v.parse::<u64>()) {
            (true, Ok(n)) => QueryArg::UInt(n),
            _ => QueryArg::Str(v.clone()),
        })
        .collect();
    Fragment::bound(
        format!(
            "{} {}IN ({})",
            column,
            if negate { "NOT " } else { "" },
            placeholders
        ),
        args,
    )
}

fn common_conditions(filter: &Filter, prefix: &str) -> Vec<Fragment> {
    let options: [(&str, &Vec<String>, bool); 17] = [
        ("language", &filter.language, false),
        ("country_code", &filter.country, false),
        ("city", &filter.city, false),
        ("referrer", &filter.referrer, false),
        ("referrer_name", &filter.referrer_name, false),
        ("os", &filter.os, false),
        ("os_version", &filter.os_version, false),
        ("browser", &filter.browser, false),
        ("browser_version", &filter.browser_version, false),
        ("screen_class", &filter.screen_class, false),
        ("screen_width", &filter.screen_width, true),
        ("screen_height", &filter.screen_height, true),
        ("utm_source", &filter.utm_source, false),
        ("utm_medium", &filter.utm_medium, false),
        ("utm_campaign", &filter.utm_campaign, false),
        ("utm_content", &filter.utm_content, false),
        ("utm_term", &filter.utm_term, false),
    ];
    let mut out = Vec::new();
    for (column, values, numeric) in options {
        if !values.is_empty() {
            out.extend(in_conditions(&format!("{}{}", prefix, column), values, numeric));
        }
    }
    if let Some(platform) = filter.platform {
        let (desktop, mobile) = match platform {
            Platform::Desktop => (1, 0),
            Platform::Mobile => (0, 1),
            Platform::Unknown => (0, 0),
        };
        out.push(Fragment::raw(format!(
            "{p}desktop = {} AND {p}mobile = {}",
            desktop,
            mobile,
            p = prefix
        )));
    }
    out
}

fn path_conditions(filter: &Filter, column: &str) -> Vec<Fragment> {
    let mut out = in_conditions(column, &filter.path, false);
    let (exclude, include): (Vec<&String>, Vec<&String>) =
        filter.path_pattern.iter().partition(|p| p.starts_with('!'));
    if !include.is_empty() {
        let parts = include
            .into_iter()
            .map(|p| {
                Fragment::bound(
                    format!("match({}, ?)", column),
                    vec![QueryArg::Str(p.clone())],
                )
            })
            .collect();
        let mut f = Fragment::raw("(");
        f.append(Fragment::join(parts, " OR "));
        f.push_str(")");
        out.push(f);
    }
    for p in exclude {
        out.push(Fragment::bound(
            format!("NOT match({}, ?)", column),
            vec![QueryArg::Str(p.trim_start_matches('!').to_string())],
        ));
    }
    out
}

fn entry_exit_conditions(filter: &Filter) -> Vec<Fragment> {
    let mut out = in_conditions("entry_path", &filter.entry_path, false);
    out.extend(in_conditions("exit_path", &filter.exit_path, false));
    out
}

fn event_conditions(filter: &Filter, prefix: &str) -> Vec<Fragment> {
    let mut out = in_conditions(&format!("{}event_name", prefix), &filter.event_name, false);
    for key in &filter.event_meta_key {
        let (not, key) = match key.strip_prefix('!') {
            Some(k) => ("NOT ", k),
            None => ("", key.as_str()),
        };
        out.push(Fragment::bound(
            format!("{}has({}event_meta_keys, ?)", not, prefix),
            vec![QueryArg::Str(key.to_string())],
        ));
    }
    for (key, value) in &filter.event_meta {
        out.push(Fragment::bound(
            format!(
                "{p}event_meta_values[indexOf({p}event_meta_keys, ?)] = ?",
                p = prefix
            ),
            vec![QueryArg::Str(key.clone()), QueryArg::Str(value.clone())],
        ));
    }
    out
}

fn search_conditions(
    filter: &Filter,
    expr_of: impl Fn(&Field) -> Option<&'static str>,
) -> Result<Vec<Fragment>> {
    let mut out = Vec::with_capacity(filter.search.len());
    for search in &filter.search {
        let field = Field::by_name(&search.field)?;
        if field.aggregate {
            return Err(Error::config(format!("cannot search aggregate {}", field.name)));
        }
        let expr = expr_of(&field).ok_or_else(|| {
            Error::config(format!("field {} cannot be searched here", field.name))
        })?;
        out.push(Fragment::bound(
            format!("ilike({}, ?)", expr),
            vec![QueryArg::Str(format!("%{}%", escape_like(&search.needle)))],
        ));
    }
    Ok(out)
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
