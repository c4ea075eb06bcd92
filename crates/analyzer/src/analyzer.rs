//! Visitor, platform, dimension and event statistics.

use std::sync::Arc;

use pirsch_core::query::{self, Query};
use pirsch_core::{
    ConversionStats, DimensionStats, EventStats, Field, Filter, Platform, PlatformStats, Result,
    ScreenSizeStats, Store, TotalVisitorStats,
};
use tracing::debug;

/// Runs statistical queries against a [`Store`].
///
/// Every method works on its own copy of the filter; the caller's filter is
/// never modified.
#[derive(Clone)]
pub struct Analyzer {
    pub(crate) store: Arc<dyn Store>,
}

impl Analyzer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Unique visitors, sessions, page views, bounces and the bounce rate,
    /// plus the average time on page with `include_avg_time_on_page`.
    pub async fn total_visitors(&self, filter: &Filter) -> Result<TotalVisitorStats> {
        let q = query::build(
            filter,
            &[
                Field::VISITORS,
                Field::SESSIONS,
                Field::VIEWS,
                Field::BOUNCES,
                Field::BOUNCE_RATE,
            ],
            &[],
            &[],
        )?;
        let mut stats = self.store.get_total_visitor_stats(&q).await?;
        if filter.include_avg_time_on_page {
            stats.average_time_spent_seconds = self.avg_time_on_page(filter).await?;
        }
        Ok(stats)
    }

    /// Visitors matching the path patterns relative to all visitors. `None`
    /// without a path pattern.
    pub async fn conversions(&self, filter: &Filter) -> Result<Option<ConversionStats>> {
        let filter = filter.normalized()?;
        if filter.path_pattern.is_empty() {
            return Ok(None);
        }
        let q = query::build(&filter, &[Field::VISITORS, Field::VIEWS, Field::CR], &[], &[])?;
        Ok(Some(self.store.get_conversion_stats(&q).await?))
    }

    /// Visitors on desktop, mobile and unknown platforms.
    pub async fn platform(&self, filter: &Filter) -> Result<PlatformStats> {
        let desktop = self.platform_visitors(filter, Platform::Desktop).await?;
        let mobile = self.platform_visitors(filter, Platform::Mobile).await?;
        let unknown = self.platform_visitors(filter, Platform::Unknown).await?;
        let total = desktop + mobile + unknown;
        Ok(PlatformStats {
            platform_desktop: desktop,
            platform_mobile: mobile,
            platform_unknown: unknown,
            relative_platform_desktop: share(desktop, total),
            relative_platform_mobile: share(mobile, total),
            relative_platform_unknown: share(unknown, total),
        })
    }

    async fn platform_visitors(&self, filter: &Filter, platform: Platform) -> Result<u64> {
        let mut filter = filter.clone();
        filter.platform = Some(platform);
        filter.sort.clear();
        let q = query::build(&filter, &[Field::VISITORS], &[], &[])?;
        self.store.count(&q).await
    }

    pub async fn languages(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::LANGUAGE).await
    }

    pub async fn countries(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::COUNTRY).await
    }

    pub async fn cities(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::CITY).await
    }

    pub async fn browser(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::BROWSER).await
    }

    pub async fn os(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::OS).await
    }

    /// Visitors per referring host.
    pub async fn referrers(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::REFERRER_NAME).await
    }

    pub async fn screen_class(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::SCREEN_CLASS).await
    }

    pub async fn utm_source(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::UTM_SOURCE).await
    }

    pub async fn utm_medium(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::UTM_MEDIUM).await
    }

    pub async fn utm_campaign(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::UTM_CAMPAIGN).await
    }

    pub async fn utm_content(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::UTM_CONTENT).await
    }

    pub async fn utm_term(&self, filter: &Filter) -> Result<Vec<DimensionStats>> {
        self.dimension(filter, Field::UTM_TERM).await
    }

    /// Visitors per value of a single dimension.
    async fn dimension(&self, filter: &Filter, field: Field) -> Result<Vec<DimensionStats>> {
        let q = query::build(
            filter,
            &[field, Field::VISITORS, Field::RELATIVE_VISITORS],
            &[field],
            &[Field::VISITORS, field],
        )?;
        debug!(field = field.name, "Dimension statistics");
        self.store.select_dimension_stats(&q).await
    }

    /// Visitors per screen width and height.
    pub async fn screen_size(&self, filter: &Filter) -> Result<Vec<ScreenSizeStats>> {
        let q = query::build(
            filter,
            &[
                Field::SCREEN_WIDTH,
                Field::SCREEN_HEIGHT,
                Field::VISITORS,
                Field::RELATIVE_VISITORS,
            ],
            &[Field::SCREEN_WIDTH, Field::SCREEN_HEIGHT],
            &[Field::VISITORS, Field::SCREEN_WIDTH, Field::SCREEN_HEIGHT],
        )?;
        self.store.select_screen_size_stats(&q).await
    }

    /// Visitors, count, conversion rate and average duration per event name.
    pub async fn events(&self, filter: &Filter) -> Result<Vec<EventStats>> {
        let q = query::build(
            filter,
            &[
                Field::EVENT_NAME,
                Field::VISITORS,
                Field::COUNT,
                Field::CR,
                Field::EVENT_TIME_SPENT,
            ],
            &[Field::EVENT_NAME],
            &[Field::VISITORS, Field::EVENT_NAME],
        )?;
        self.store.select_event_stats(&q).await
    }

    /// Average seconds between a page view and the next one in the same
    /// session, over all matching pages.
    pub async fn avg_time_on_page(&self, filter: &Filter) -> Result<u64> {
        let q: Query = query::avg_time_on_page(filter)?;
        self.store.count(&q).await
    }
}

/// `part / total`, zero for an empty total.
pub(crate) fn share(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
