//! Page, entry, exit and active visitor statistics.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pirsch_core::limits::MAX_FILTER_VALUES;
use pirsch_core::query::{self, Table};
use pirsch_core::{
    ActiveVisitorStats, Direction, EntryStats, ExitStats, Field, Filter, PageStats, Result, Sort,
    TotalVisitorSessionStats,
};

use crate::analyzer::{share, Analyzer};

impl Analyzer {
    /// Visitors, sessions, views and bounces per page.
    ///
    /// With `include_time_on_page` the average time on page is added from a
    /// second query. Event filters select event rows instead, which carry
    /// their own duration.
    pub async fn by_path(&self, filter: &Filter) -> Result<Vec<PageStats>> {
        let mut fields = vec![Field::PATH];
        let mut group_by = vec![Field::PATH];
        if filter.include_title {
            fields.push(Field::TITLE);
            group_by.push(Field::TITLE);
        }
        fields.extend([
            Field::VISITORS,
            Field::SESSIONS,
            Field::RELATIVE_VISITORS,
            Field::VIEWS,
            Field::RELATIVE_VIEWS,
            Field::BOUNCES,
            Field::BOUNCE_RATE,
        ]);
        let events = query::table(filter, &fields) == Table::Event;
        if events {
            fields.push(Field::EVENT_TIME_SPENT);
        }

        let q = query::build(filter, &fields, &group_by, &[Field::VISITORS, Field::PATH])?;
        let mut stats = self
            .store
            .select_page_stats(filter.include_title, events, &q)
            .await?;

        if filter.include_time_on_page && !events && !stats.is_empty() {
            let paths: Vec<String> = stats.iter().map(|s| s.path.clone()).collect();
            let times = self.time_on_page(filter, &paths).await?;
            for s in &mut stats {
                s.average_time_spent_seconds = times.get(&s.path).copied().unwrap_or_default();
            }
        }
        Ok(stats)
    }

    /// Sessions per entry page, with the entry rate relative to all live
    /// sessions in the time range.
    pub async fn entry(&self, filter: &Filter) -> Result<Vec<EntryStats>> {
        let (filter, post_sort) = split_sort(filter);
        let mut fields = vec![Field::ENTRY_PATH];
        if filter.include_title {
            fields.push(Field::ENTRY_TITLE);
        }
        fields.push(Field::ENTRIES);
        let group_by = fields[..fields.len() - 1].to_vec();

        let q = query::build(&filter, &fields, &group_by, &[Field::ENTRIES, Field::ENTRY_PATH])?;
        let mut stats = self
            .store
            .select_entry_stats(filter.include_title, &q)
            .await?;
        if stats.is_empty() {
            return Ok(stats);
        }

        let total_sessions = self.store.count(&query::total_sessions(&filter)?).await?;
        let paths: Vec<String> = stats.iter().map(|s| s.path.clone()).collect();
        let totals = self.total_visitors_sessions(&filter, &paths).await?;
        for s in &mut stats {
            if let Some(total) = totals.get(&s.path) {
                s.visitors = total.visitors;
                s.sessions = total.sessions;
            }
            s.entry_rate = share(s.entries, total_sessions);
        }

        if filter.include_time_on_page {
            let times = self.time_on_page(&filter, &paths).await?;
            for s in &mut stats {
                s.average_time_spent_seconds = times.get(&s.path).copied().unwrap_or_default();
            }
        }

        if let Some(sort) = post_sort {
            sort_merged(&mut stats, sort, |s| (s.visitors, s.sessions, &s.path));
        }
        Ok(stats)
    }

    /// Sessions per exit page, with the exit rate relative to all live
    /// sessions in the time range.
    pub async fn exit(&self, filter: &Filter) -> Result<Vec<ExitStats>> {
        let (filter, post_sort) = split_sort(filter);
        let mut fields = vec![Field::EXIT_PATH];
        if filter.include_title {
            fields.push(Field::EXIT_TITLE);
        }
        fields.push(Field::EXITS);
        let group_by = fields[..fields.len() - 1].to_vec();

        let q = query::build(&filter, &fields, &group_by, &[Field::EXITS, Field::EXIT_PATH])?;
        let mut stats = self
            .store
            .select_exit_stats(filter.include_title, &q)
            .await?;
        if stats.is_empty() {
            return Ok(stats);
        }

        let total_sessions = self.store.count(&query::total_sessions(&filter)?).await?;
        let paths: Vec<String> = stats.iter().map(|s| s.path.clone()).collect();
        let totals = self.total_visitors_sessions(&filter, &paths).await?;
        for s in &mut stats {
            if let Some(total) = totals.get(&s.path) {
                s.visitors = total.visitors;
                s.sessions = total.sessions;
            }
            s.exit_rate = share(s.exits, total_sessions);
        }

        if let Some(sort) = post_sort {
            sort_merged(&mut stats, sort, |s| (s.visitors, s.sessions, &s.path));
        }
        Ok(stats)
    }

    /// Visitors per page since `now - duration`, and the total number of
    /// active visitors.
    pub async fn active_visitors(
        &self,
        filter: &Filter,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ActiveVisitorStats>, u64)> {
        let mut filter = filter.clone();
        let duration = chrono::Duration::from_std(duration)
            .map_err(|_| pirsch_core::Error::config("active visitor duration out of range"))?;
        let from = now - duration;
        filter.from = Some(from);
        filter.start = Some(from.date_naive());
        filter.end = Some(now.date_naive());

        let mut fields = vec![Field::PATH];
        if filter.include_title {
            fields.push(Field::TITLE);
        }
        let group_by = fields.clone();
        fields.push(Field::VISITORS);

        let q = query::build(&filter, &fields, &group_by, &[Field::VISITORS, Field::PATH])?;
        let stats = self
            .store
            .select_active_visitor_stats(filter.include_title, &q)
            .await?;

        let mut total_filter = filter.clone();
        total_filter.sort.clear();
        total_filter.limit = 0;
        total_filter.offset = 0;
        let q = query::build(&total_filter, &[Field::VISITORS], &[], &[])?;
        let total = self.store.count(&q).await?;
        Ok((stats, total))
    }

    /// Visitors, sessions and views of the given paths.
    async fn total_visitors_sessions(
        &self,
        filter: &Filter,
        paths: &[String],
    ) -> Result<HashMap<String, TotalVisitorSessionStats>> {
        let mut totals = HashMap::with_capacity(paths.len());
        for chunk in paths.chunks(MAX_FILTER_VALUES) {
            let mut filter = path_scope(filter);
            filter.path = chunk.to_vec();
            let q = query::build(
                &filter,
                &[Field::PATH, Field::VISITORS, Field::SESSIONS, Field::VIEWS],
                &[Field::PATH],
                &[Field::VISITORS, Field::PATH],
            )?;
            for row in self.store.select_total_visitor_session_stats(&q).await? {
                totals.insert(row.path.clone(), row);
            }
        }
        Ok(totals)
    }

    /// Average time on page for the given paths.
    async fn time_on_page(&self, filter: &Filter, paths: &[String]) -> Result<HashMap<String, u64>> {
        let mut times = HashMap::with_capacity(paths.len());
        for chunk in paths.chunks(MAX_FILTER_VALUES) {
            let q = query::time_on_page(filter, chunk)?;
            for row in self.store.select_avg_time_spent_stats(&q).await? {
                times.insert(row.path, row.average_time_spent_seconds);
            }
        }
        Ok(times)
    }
}

/// Copy of the filter for per-path totals: no paging, sorting or search.
fn path_scope(filter: &Filter) -> Filter {
    let mut f = filter.clone();
    f.sort.clear();
    f.search.clear();
    f.limit = 0;
    f.offset = 0;
    f.include_title = false;
    f
}

/// Sort on a page total that entry and exit queries do not select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergedSort {
    Visitors(Direction),
    Sessions(Direction),
}

/// Moves a requested sort on `visitors` or `sessions` out of the filter, to
/// be applied to the merged result.
fn split_sort(filter: &Filter) -> (Filter, Option<MergedSort>) {
    let mut f = filter.clone();
    let mut merged = None;
    f.sort.retain(|s: &Sort| {
        let sort = if s.field == Field::VISITORS.name {
            MergedSort::Visitors(s.direction)
        } else if s.field == Field::SESSIONS.name {
            MergedSort::Sessions(s.direction)
        } else {
            return true;
        };
        merged.get_or_insert(sort);
        false
    });
    (f, merged)
}

fn sort_merged<T>(stats: &mut [T], sort: MergedSort, key: impl Fn(&T) -> (u64, u64, &String)) {
    stats.sort_by(|a, b| {
        let (visitors_a, sessions_a, path_a) = key(a);
        let (visitors_b, sessions_b, path_b) = key(b);
        let (x, y, direction) = match sort {
            MergedSort::Visitors(direction) => (visitors_a, visitors_b, direction),
            MergedSort::Sessions(direction) => (sessions_a, sessions_b, direction),
        };
        let by_total = match direction {
            Direction::Asc => x.cmp(&y),
            Direction::Desc => y.cmp(&x),
        };
        by_total.then_with(|| path_a.cmp(path_b))
    });
}
