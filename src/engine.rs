use crate::band::{DataBand, SortOrder, SortSpec};
use crate::binding::{self, InitRequest};
use crate::canvas::{ApproxTextMeasurer, TextMeasurer};
use crate::columns::ColumnLayout;
use crate::component::{ComponentId, ObjectKind};
use crate::debug::{DEBUG_LOG_ENV, DebugLogger};
use crate::error::ReportError;
use crate::evaluator::{ColumnEvaluator, DataContext, Evaluator, TextPart, split_expressions};
use crate::frame::{AddResult, Frame};
use crate::layout::{self, LayoutListener};
use crate::metrics::{PageMetrics, PrepareMetrics};
use crate::objects::{ImageState, PictureObject, TextObject};
use crate::page::ReportPage;
use crate::prepared::{BandInstance, PreparedPage, PreparedPages, snapshot_band};
use crate::report::Report;
use crate::resource::{FileResourceLoader, ResourceLoader};
use crate::tree::ComponentTree;
use crate::types::{Pt, Rect};
use crate::value::Value;
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Cooperative cancellation for [`ReportEngine::prepare_async`]. Checked
/// before every component's data step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct EngineBuilder {
    double_pass: bool,
    debug_path: Option<PathBuf>,
    debug: Option<DebugLogger>,
    text_measurer: Arc<dyn TextMeasurer>,
    resource_loader: Arc<dyn ResourceLoader>,
    evaluator: Arc<dyn Evaluator>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            double_pass: false,
            debug_path: None,
            debug: None,
            text_measurer: Arc::new(ApproxTextMeasurer),
            resource_loader: Arc::new(FileResourceLoader),
            evaluator: Arc::new(ColumnEvaluator),
        }
    }
}

impl EngineBuilder {
    // Run the report twice so `TotalPages#` is known on every page.
    pub fn double_pass(mut self, enabled: bool) -> Self {
        self.double_pass = enabled;
        self
    }

    // Write pagination decisions to a JSONL file.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub(crate) fn debug_logger(mut self, logger: DebugLogger) -> Self {
        self.debug = Some(logger);
        self
    }

    pub fn text_measurer(mut self, measurer: impl TextMeasurer + 'static) -> Self {
        self.text_measurer = Arc::new(measurer);
        self
    }

    pub fn resource_loader(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.resource_loader = Arc::new(loader);
        self
    }

    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn build(self) -> Result<ReportEngine, ReportError> {
        let path = self
            .debug_path
            .or_else(|| std::env::var_os(DEBUG_LOG_ENV).map(PathBuf::from));
        let debug = match (self.debug, path) {
            (Some(logger), _) => Some(logger),
            (None, Some(path)) => Some(DebugLogger::new(path)?),
            (None, None) => None,
        };
        Ok(ReportEngine {
            double_pass: self.double_pass,
            debug,
            measurer: self.text_measurer,
            loader: self.resource_loader,
            evaluator: self.evaluator,
        })
    }
}

/// Turns a [`Report`] into [`PreparedPages`].
///
/// The pass is written once as async code; [`ReportEngine::prepare`] drives
/// it to completion on the calling thread.
pub struct ReportEngine {
    double_pass: bool,
    debug: Option<DebugLogger>,
    measurer: Arc<dyn TextMeasurer>,
    loader: Arc<dyn ResourceLoader>,
    evaluator: Arc<dyn Evaluator>,
}

impl ReportEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn measurer(&self) -> Arc<dyn TextMeasurer> {
        self.measurer.clone()
    }

    pub fn prepare(&self, report: &mut Report) -> Result<PreparedPages, ReportError> {
        pollster::block_on(self.prepare_async(report, &CancellationToken::new()))
    }

    pub async fn prepare_async(
        &self,
        report: &mut Report,
        cancel: &CancellationToken,
    ) -> Result<PreparedPages, ReportError> {
        self.run(report, cancel).await.map(|(pages, _)| pages)
    }

    pub fn prepare_with_metrics(
        &self,
        report: &mut Report,
    ) -> Result<(PreparedPages, PrepareMetrics), ReportError> {
        pollster::block_on(self.run(report, &CancellationToken::new()))
    }

    /// Whether `band` would print nothing with the current data. Data bands
    /// are empty when their source yields no rows (unless
    /// PrintIfDatasourceEmpty) or when every row has only empty details.
    pub fn is_band_empty(&self, report: &mut Report, band: ComponentId) -> Result<bool, ReportError> {
        let cancel = CancellationToken::new();
        pollster::block_on(async move {
            let mut pass = PassState::new(self, report, &cancel);
            pass.is_band_empty(band).await
        })
    }

    async fn run(
        &self,
        report: &mut Report,
        cancel: &CancellationToken,
    ) -> Result<(PreparedPages, PrepareMetrics), ReportError> {
        let templates = report.pages();
        if templates.is_empty() {
            return Err(ReportError::EmptyReport);
        }
        let started = Instant::now();
        let passes = if self.double_pass { 2 } else { 1 };
        let mut total_pages = 0;
        let mut result = None;
        for pass in 1..=passes {
            binding::reset_sources(&mut report.dictionary);
            for total in &mut report.dictionary.totals {
                total.reset();
            }
            report.dictionary.system = Default::default();
            report.dictionary.system.total_pages = total_pages;

            let mut state = PassState::new(self, report, cancel);
            let outcome = state.run(&templates).await;
            let (pages, mut metrics) = state.finish();
            outcome?;
            log::debug!("pass {pass} produced {} pages", pages.len());
            total_pages = pages.len();
            metrics.passes = pass;
            result = Some((pages, metrics));
        }
        if let Some(debug) = &self.debug {
            debug.emit_summary("prepare");
            debug.flush();
        }
        let (pages, mut metrics) = result.ok_or(ReportError::EmptyReport)?;
        metrics.total_prepare_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok((pages, metrics))
    }
}

// Counts laid out bands and containers in the debug trace.
struct TraceListener<'a> {
    debug: Option<&'a DebugLogger>,
}

impl LayoutListener for TraceListener<'_> {
    fn after_layout(&mut self, tree: &ComponentTree, id: ComponentId) {
        if let Some(debug) = self.debug {
            let key = if tree.get(id).is_some_and(|c| c.is_band()) {
                "layout.band"
            } else {
                "layout.container"
            };
            debug.increment(key, 1);
        }
    }
}

struct PageState {
    page: PreparedPage,
    frame: Frame,
    started: Instant,
    band_count: usize,
}

/// One print pass over every page template.
struct PassState<'a> {
    engine: &'a ReportEngine,
    report: &'a mut Report,
    cancel: &'a CancellationToken,
    output: PreparedPages,
    metrics: PrepareMetrics,
    current: Option<PageState>,
    template: Option<ComponentId>,
    template_page: usize,
    page_number: usize,
    abs_row: usize,
    repeat_headers: Vec<ComponentId>,
    repeat_footers: Vec<ComponentId>,
    // Sources of the data bands whose rows are being printed, innermost last.
    masters: Vec<String>,
}

impl<'a> PassState<'a> {
    fn new(engine: &'a ReportEngine, report: &'a mut Report, cancel: &'a CancellationToken) -> Self {
        Self {
            engine,
            report,
            cancel,
            output: PreparedPages::default(),
            metrics: PrepareMetrics::default(),
            current: None,
            template: None,
            template_page: 0,
            page_number: 0,
            abs_row: 0,
            repeat_headers: Vec::new(),
            repeat_footers: Vec::new(),
            masters: Vec::new(),
        }
    }

    fn finish(self) -> (PreparedPages, PrepareMetrics) {
        (self.output, self.metrics)
    }

    fn check_cancel(&self) -> Result<(), ReportError> {
        if self.cancel.is_cancelled() {
            return Err(ReportError::Cancelled);
        }
        Ok(())
    }

    fn band_name(&self, id: ComponentId) -> String {
        self.report
            .tree
            .get(id)
            .map(|c| c.name().to_string())
            .unwrap_or_default()
    }

    fn declared_height(&self, id: ComponentId) -> Pt {
        self.report
            .tree
            .get(id)
            .map(|c| c.base.bounds.height)
            .unwrap_or(Pt::ZERO)
    }

    fn data_band(&self, id: ComponentId) -> Option<DataBand> {
        self.report
            .tree
            .get(id)
            .and_then(|c| c.as_band())
            .and_then(|b| b.as_data())
            .cloned()
    }

    fn page_template(&self) -> Option<ReportPage> {
        self.template
            .and_then(|id| self.report.tree.get(id))
            .and_then(|c| c.as_page())
            .cloned()
    }

    fn left(&self) -> Pt {
        self.current
            .as_ref()
            .map(|state| state.frame.rect().x)
            .unwrap_or(Pt::ZERO)
    }

    fn printable_width(&self) -> Pt {
        self.current
            .as_ref()
            .map(|state| state.frame.rect().width)
            .unwrap_or(Pt::ZERO)
    }

    async fn run(&mut self, templates: &[ComponentId]) -> Result<(), ReportError> {
        for template in templates {
            self.check_cancel()?;
            self.template = Some(*template);
            self.template_page = 0;
            let Some(page) = self.page_template() else {
                continue;
            };
            self.start_page().await?;
            if let Some(title) = page.title {
                let breaks = self
                    .report
                    .tree
                    .get(title)
                    .and_then(|c| c.as_band())
                    .is_some_and(|b| b.effective_start_new_page());
                if breaks {
                    self.new_page("title", title).await?;
                }
            }
            for band in &page.bands {
                self.run_band(*band).await?;
            }
            if let Some(summary) = page.summary {
                self.show_band(summary, false).await?;
            }
            self.end_page().await?;
        }
        Ok(())
    }

    async fn start_page(&mut self) -> Result<(), ReportError> {
        let Some(page) = self.page_template() else {
            return Ok(());
        };
        self.page_number += 1;
        self.template_page += 1;
        self.report.dictionary.system.page = self.page_number;

        let rect = Rect {
            x: page.left_margin(),
            y: page.top_margin(),
            width: page.printable_width(),
            height: page.printable_height(),
        };
        let mut frame = Frame::new(rect);
        for reserved in page
            .page_footer
            .iter()
            .chain(page.column_footer.iter())
            .chain(self.repeat_footers.iter())
        {
            frame.reserve(self.declared_height(*reserved));
        }
        self.current = Some(PageState {
            page: PreparedPage::new(page.paper_size(), page.margins, self.page_number),
            frame,
            started: Instant::now(),
            band_count: 0,
        });

        let title = if self.template_page == 1 {
            page.title
        } else {
            None
        };
        let order = if page.title_before_header {
            [title, page.page_header]
        } else {
            [page.page_header, title]
        };
        for band in order.into_iter().flatten() {
            self.print_fixed(band, false).await?;
        }
        if let Some(header) = page.column_header {
            self.print_fixed(header, false).await?;
        }
        for header in self.repeat_headers.clone() {
            self.print_fixed(header, true).await?;
        }
        if let Some(state) = self.current.as_mut() {
            state.frame.mark_content_start();
        }
        Ok(())
    }

    async fn end_page(&mut self) -> Result<(), ReportError> {
        let Some(page) = self.page_template() else {
            return Ok(());
        };
        for footer in self.repeat_footers.clone() {
            self.print_fixed(footer, true).await?;
        }

        let Some(mut bottom) = self.current.as_ref().map(|s| s.frame.rect().bottom()) else {
            return Ok(());
        };
        let left = self.left();
        for band in [page.page_footer, page.column_footer].into_iter().flatten() {
            let Some(instance) = self.prepare_band(band, false, None).await? else {
                continue;
            };
            bottom -= instance.height;
            self.place_fixed_at(&instance, left, bottom);
            self.reset_totals_after(band);
        }
        let top = self.current.as_ref().map(|s| s.frame.rect().y).unwrap_or(Pt::ZERO);
        for overlay in &page.overlays {
            if let Some(instance) = self.prepare_band(*overlay, false, None).await? {
                self.place_fixed_at(&instance, left, top);
            }
        }

        if let Some(state) = self.current.take() {
            let bands = state.page.bands().count();
            self.metrics.pages.push(PageMetrics {
                page_number: state.page.page_number,
                prepare_ms: state.started.elapsed().as_secs_f64() * 1000.0,
                band_count: state.band_count,
                object_count: state.page.objects.len() - bands,
            });
            self.output.pages.push(state.page);
        }
        Ok(())
    }

    async fn new_page(&mut self, reason: &str, band: ComponentId) -> Result<(), ReportError> {
        let name = self.band_name(band);
        log::debug!(
            "page break after page {} ({reason}) at `{name}`",
            self.page_number
        );
        if let Some(debug) = &self.engine.debug {
            debug.page_break(self.page_number, reason, Some(&name));
        }
        self.end_page().await?;
        self.start_page().await
    }

    fn place_fixed_at(&mut self, instance: &BandInstance, x: Pt, y: Pt) {
        if let Some(state) = self.current.as_mut() {
            state.frame.place_at(instance, x, y, &mut state.page);
            state.band_count += 1;
        }
    }

    /// Prints a page-start or page-end band at the cursor without breaking.
    async fn print_fixed(&mut self, id: ComponentId, repeated: bool) -> Result<(), ReportError> {
        let mut next = Some(id);
        while let Some(band) = next {
            next = self
                .report
                .tree
                .get(band)
                .and_then(|c| c.as_band())
                .and_then(|b| b.child);
            let Some(instance) = self.prepare_band(band, repeated, None).await? else {
                break;
            };
            let x = self.left();
            if let Some(state) = self.current.as_mut() {
                let y = state.frame.current_y();
                state.frame.place_at(&instance, x, y, &mut state.page);
                state.frame.set_cursor_y(state.frame.cursor_y() + instance.height);
                state.band_count += 1;
            }
            self.reset_totals_after(band);
        }
        Ok(())
    }

    async fn show_band(&mut self, id: ComponentId, repeated: bool) -> Result<(), ReportError> {
        self.show_band_with(id, repeated, Pt::ZERO, None, false).await
    }

    /// Prints `id` and its child bands into the flow. `offset` and `width`
    /// apply to `id` only. `keep_start` suppresses the StartNewPage break of
    /// `id`, used for the first row printed right below its data header.
    async fn show_band_with(
        &mut self,
        id: ComponentId,
        repeated: bool,
        offset: Pt,
        width: Option<Pt>,
        keep_start: bool,
    ) -> Result<(), ReportError> {
        let mut next = Some((id, offset, width, keep_start));
        while let Some((band, offset, width, keep_start)) = next {
            next = self
                .report
                .tree
                .get(band)
                .and_then(|c| c.as_band())
                .and_then(|b| b.child)
                .map(|child| (child, Pt::ZERO, None, false));
            let Some(instance) = self.prepare_band(band, repeated, width).await? else {
                break;
            };
            let x = self.left() + offset;
            self.place(band, instance, x, keep_start).await?;
            self.reset_totals_after(band);
        }
        Ok(())
    }

    async fn place(
        &mut self,
        id: ComponentId,
        mut instance: BandInstance,
        x: Pt,
        keep_start: bool,
    ) -> Result<(), ReportError> {
        let (start_new_page, print_on_bottom) = self
            .report
            .tree
            .get(id)
            .and_then(|c| c.as_band())
            .map(|b| (b.effective_start_new_page(), b.effective_print_on_bottom()))
            .unwrap_or((false, false));
        let frame_empty = self.current.as_ref().map_or(true, |s| s.frame.is_empty());
        if start_new_page && !keep_start && !instance.repeated && !frame_empty {
            self.new_page("start_new_page", id).await?;
        }

        if print_on_bottom {
            let fits = self
                .current
                .as_ref()
                .is_some_and(|s| s.frame.fits(instance.height) || s.frame.is_empty());
            if !fits {
                self.new_page("print_on_bottom", id).await?;
            }
            if let Some(state) = self.current.as_mut() {
                let rect = state.frame.rect();
                let y = (rect.bottom() - state.frame.reserved() - instance.height)
                    .max(state.frame.current_y());
                state.frame.place_at(&instance, x, y, &mut state.page);
                state.frame.set_cursor_y(y + instance.height - rect.y);
                state.band_count += 1;
            }
            return Ok(());
        }

        loop {
            let Some(state) = self.current.as_mut() else {
                return Ok(());
            };
            match state.frame.add(instance, x, &mut state.page) {
                AddResult::Placed => {
                    state.band_count += 1;
                    return Ok(());
                }
                AddResult::Split(rest) => {
                    state.band_count += 1;
                    self.metrics.band_breaks += 1;
                    if let Some(debug) = &self.engine.debug {
                        debug.increment("engine.band_split", 1);
                    }
                    self.new_page("band_break", id).await?;
                    instance = rest;
                }
                AddResult::Overflow(band) => {
                    self.new_page("overflow", id).await?;
                    instance = band;
                }
            }
        }
    }

    /// Fills `id` with data, lays it out and captures a printable copy.
    /// The band's design-time state is restored before returning.
    async fn prepare_band(
        &mut self,
        id: ComponentId,
        repeated: bool,
        width: Option<Pt>,
    ) -> Result<Option<BandInstance>, ReportError> {
        self.check_cancel()?;
        let page_number = self.page_number;
        let printable = self.printable_width();
        let tree = &mut self.report.tree;
        let Some(component) = tree.get(id) else {
            return Ok(None);
        };
        if !component.base.visible || !component.base.print_on.allows(page_number, repeated) {
            return Ok(None);
        }
        let band_width = component.base.bounds.width;

        let objects = object_descendants(tree, id);
        let mut handed = HashMap::new();
        for object in &objects {
            if let Some(text) = tree.get_mut(*object).and_then(|c| c.as_text_mut()) {
                if let Some(rest) = text.break_text.take() {
                    handed.insert(*object, rest);
                }
            }
        }
        let saved = tree.save_state(id);
        if let Some(component) = tree.get_mut(id) {
            if let Some(band) = component.as_band_mut() {
                band.repeated = repeated;
            }
            if width.is_none() && band_width.is_zero() {
                component.base.bounds.width = printable;
            }
        }
        if let Some(width) = width {
            let height = tree.get(id).map(|c| c.base.bounds.height).unwrap_or(Pt::ZERO);
            tree.resize(id, width, height);
        }

        let result = self.fill_band(id, &objects, handed, repeated).await;
        self.report.tree.restore_state(saved);
        result
    }

    async fn fill_band(
        &mut self,
        id: ComponentId,
        objects: &[ComponentId],
        mut handed: HashMap<ComponentId, String>,
        repeated: bool,
    ) -> Result<Option<BandInstance>, ReportError> {
        for object in objects {
            self.get_data(*object, &mut handed).await?;
        }

        let measurer = self.engine.measurer.clone();
        let tree = &mut self.report.tree;
        for object in objects {
            let Some(target) = tree.get(*object).and_then(|c| c.base.break_to) else {
                continue;
            };
            tree.break_component(*object, measurer.as_ref());
            if objects.contains(&target) {
                if let Some(text) = tree.get_mut(target).and_then(|c| c.as_text_mut()) {
                    if let Some(rest) = text.break_text.take() {
                        text.display = Some(rest);
                    }
                }
            }
        }

        let mut listener = TraceListener {
            debug: self.engine.debug.as_ref(),
        };
        let height = layout::calc_height(tree, id, measurer.as_ref(), &mut listener);
        if let Some(component) = tree.get_mut(id) {
            component.base.bounds.height = height;
        }
        Ok(snapshot_band(
            tree,
            id,
            measurer.as_ref(),
            self.page_number,
            repeated,
        ))
    }

    /// The data step of one object: expand text expressions, take over
    /// broken-off text, load pictures.
    async fn get_data(
        &mut self,
        id: ComponentId,
        handed: &mut HashMap<ComponentId, String>,
    ) -> Result<(), ReportError> {
        self.check_cancel()?;
        let Some(component) = self.report.tree.get(id) else {
            return Ok(());
        };
        let name = component.base.name.clone();
        match &component.kind {
            ObjectKind::Text(text) => {
                let text = text.clone();
                let display = match handed.remove(&id) {
                    Some(rest) => Some(rest),
                    None if text.allow_expressions => Some(self.expand_text(&name, &text).await?),
                    None => None,
                };
                if let Some(text) = self.report.tree.get_mut(id).and_then(|c| c.as_text_mut()) {
                    text.display = display;
                }
            }
            ObjectKind::Picture(picture) => {
                let picture = picture.clone();
                let state = self.load_picture(&name, &picture).await?;
                if let ImageState::Loaded(image) = &state {
                    self.output.add_image(&image.resource_id, image.bytes.clone());
                }
                if let Some(ObjectKind::Picture(picture)) =
                    self.report.tree.get_mut(id).map(|c| &mut c.kind)
                {
                    picture.image = state;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn calc(&self, component: &str, expression: &str) -> Result<Value, ReportError> {
        let context = DataContext::new(&self.report.dictionary);
        self.engine
            .evaluator
            .calc_async(expression, &context)
            .await
            .map_err(|err| ReportError::expression(component, expression, err))
    }

    async fn expand_text(&self, name: &str, text: &TextObject) -> Result<String, ReportError> {
        let (open, close) = text.bracket_pair();
        let mut out = String::new();
        for part in split_expressions(&text.text, open, close) {
            match part {
                TextPart::Literal(literal) => out.push_str(&literal),
                TextPart::Expression(expression) => {
                    self.check_cancel()?;
                    let value = self.calc(name, &expression).await?;
                    if !(text.hide_zeros && value.is_zero()) {
                        out.push_str(&value.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn load_picture(
        &self,
        name: &str,
        picture: &PictureObject,
    ) -> Result<ImageState, ReportError> {
        if !picture.data_column.is_empty() {
            let value = self.calc(name, &picture.data_column).await?;
            return Ok(match value {
                Value::Bytes(bytes) => PictureObject::decode(bytes),
                Value::Null => ImageState::Empty,
                other => ImageState::Error(format!("`{other}` is not image data")),
            });
        }
        if let Some(bytes) = &picture.image_data {
            return Ok(PictureObject::decode(bytes.clone()));
        }
        if picture.image_location.is_empty() {
            return Ok(ImageState::Empty);
        }
        self.check_cancel()?;
        let state = match self.engine.loader.load(&picture.image_location).await {
            Ok(bytes) => PictureObject::decode(Arc::from(bytes)),
            Err(err) => ImageState::Error(err.to_string()),
        };
        if let ImageState::Error(message) = &state {
            log::warn!(
                "picture `{name}` could not load `{}`: {message}",
                picture.image_location
            );
        }
        Ok(state)
    }

    fn run_band(&mut self, id: ComponentId) -> LocalBoxFuture<'_, Result<(), ReportError>> {
        async move {
            let Some(band) = self.report.tree.get(id).and_then(|c| c.as_band()) else {
                return Ok(());
            };
            if band.as_data().is_some() {
                self.run_data_band(id).await
            } else if band.as_group().is_some() {
                self.run_group(id).await
            } else {
                self.show_band(id, false).await
            }
        }
        .boxed_local()
    }

    async fn init_data_band(&mut self, id: ComponentId, data: &DataBand) -> Result<usize, ReportError> {
        let name = self.band_name(id);
        let dictionary = &self.report.dictionary;
        let relation = if data.relation.is_empty() {
            self.masters
                .last()
                .and_then(|master| dictionary.find_relation(master, &data.data_source))
                .cloned()
        } else {
            Some(dictionary.relation(&data.relation).cloned().ok_or_else(|| {
                ReportError::configuration(&name, format!("unknown relation `{}`", data.relation))
            })?)
        };
        let hierarchy = data
            .is_hierarchical()
            .then(|| (data.id_column.as_str(), data.parent_id_column.as_str()));
        let request = InitRequest {
            component: &name,
            source: &data.data_source,
            relation,
            filter: &data.filter,
            sort: &data.sort,
            collect_child_rows: data.collect_child_rows,
            max_rows: data.max_rows,
            hierarchy,
        };
        binding::init(
            &mut self.report.dictionary,
            self.engine.evaluator.as_ref(),
            &request,
        )
        .await
    }

    async fn run_data_band(&mut self, id: ComponentId) -> Result<(), ReportError> {
        self.check_cancel()?;
        let Some(data) = self.data_band(id) else {
            return Ok(());
        };
        if data.data_source.is_empty() {
            return self.print_rows(id, &data, 0..data.row_count).await;
        }
        let count = self.init_data_band(id, &data).await?;
        if count == 0 {
            if data.print_if_datasource_empty {
                return self.print_empty_source(id, &data).await;
            }
            return Ok(());
        }
        self.print_rows(id, &data, 0..count).await
    }

    async fn print_empty_source(&mut self, id: ComponentId, data: &DataBand) -> Result<(), ReportError> {
        if let Some(header) = data.header {
            self.show_band(header, false).await?;
        }
        self.show_band(id, false).await?;
        if let Some(footer) = data.footer {
            self.show_band(footer, false).await?;
        }
        Ok(())
    }

    async fn keep_with_data(&mut self, header: ComponentId, data: ComponentId) -> Result<(), ReportError> {
        let keep = self
            .report
            .tree
            .get(header)
            .and_then(|c| c.as_band())
            .is_some_and(|b| b.effective_keep_with_data());
        if !keep {
            return Ok(());
        }
        let needed = self.declared_height(header) + self.declared_height(data);
        let orphaned = self
            .current
            .as_ref()
            .is_some_and(|s| !s.frame.fits(needed) && !s.frame.is_empty());
        if orphaned {
            self.new_page("keep_with_data", header).await?;
        }
        Ok(())
    }

    /// Header, the rows at `rows` (cursor positions), footer. Headers and
    /// footers flagged RepeatOnEveryPage reprint on every page the rows span.
    async fn print_rows(
        &mut self,
        id: ComponentId,
        data: &DataBand,
        rows: Range<usize>,
    ) -> Result<(), ReportError> {
        if let Some(header) = data.header {
            // The header takes the data band's page break so the first row
            // stays below it.
            let breaks = self
                .report
                .tree
                .get(id)
                .and_then(|c| c.as_band())
                .is_some_and(|b| b.effective_start_new_page());
            let frame_empty = self.current.as_ref().map_or(true, |s| s.frame.is_empty());
            if breaks && !frame_empty {
                self.new_page("start_new_page", id).await?;
            }
            self.keep_with_data(header, id).await?;
            self.show_band(header, false).await?;
        }
        let repeating_header = data.header.filter(|h| self.repeats(*h));
        let repeating_footer = data.footer.filter(|f| self.repeats(*f));
        if let Some(header) = repeating_header {
            self.repeat_headers.push(header);
        }
        if let Some(footer) = repeating_footer {
            self.repeat_footers.push(footer);
            let height = self.declared_height(footer);
            if let Some(state) = self.current.as_mut() {
                state.frame.reserve(height);
            }
        }

        let result = if data.columns.is_multi_column() && data.details.is_empty() {
            self.print_columns(id, data, rows).await
        } else {
            self.print_row_list(id, data, rows).await
        };

        if let Some(header) = repeating_header {
            self.repeat_headers.retain(|h| *h != header);
        }
        if let Some(footer) = repeating_footer {
            self.repeat_footers.retain(|f| *f != footer);
            let height = self.declared_height(footer);
            if let Some(state) = self.current.as_mut() {
                state.frame.release(height);
            }
        }
        result?;

        if let Some(footer) = data.footer {
            self.show_band(footer, false).await?;
        }
        Ok(())
    }

    fn repeats(&self, id: ComponentId) -> bool {
        self.report
            .tree
            .get(id)
            .and_then(|c| c.as_band())
            .is_some_and(|b| b.effective_repeat_on_every_page())
    }

    fn enter_row(&mut self, data: &DataBand, position: Option<usize>, index: usize) {
        if let Some(position) = position {
            self.report.dictionary.set_position(&data.data_source, position);
        }
        self.abs_row += 1;
        self.metrics.rows_processed += 1;
        let system = &mut self.report.dictionary.system;
        system.row = index + 1;
        system.abs_row = self.abs_row;
    }

    async fn print_row_list(
        &mut self,
        id: ComponentId,
        data: &DataBand,
        rows: Range<usize>,
    ) -> Result<(), ReportError> {
        let bound = !data.data_source.is_empty();
        let band_left = self
            .report
            .tree
            .get(id)
            .map(|c| c.base.bounds.x)
            .unwrap_or(Pt::ZERO);
        let mut below_header = data.header.is_some();
        for (index, row) in rows.enumerate() {
            self.check_cancel()?;
            self.enter_row(data, bound.then_some(row), index);
            if bound && self.is_detail_empty(data).await? {
                continue;
            }

            let (offset, width) = if data.is_hierarchical() {
                let level = self.report.dictionary.current_level(&data.data_source);
                let indent = data.indent * level as i32;
                let width = (self.printable_width() - band_left - indent).max(Pt::ZERO);
                (band_left + indent, Some(width))
            } else {
                (Pt::ZERO, None)
            };
            self.show_band_with(id, false, offset, width, below_header).await?;
            below_header = false;
            self.accumulate_totals(id).await?;

            if data.details.is_empty() {
                continue;
            }
            if bound {
                self.masters.push(data.data_source.clone());
            }
            let mut outcome = Ok(());
            for detail in &data.details {
                outcome = self.run_band(*detail).await;
                if outcome.is_err() {
                    break;
                }
            }
            if bound {
                self.masters.pop();
            }
            outcome?;
        }
        Ok(())
    }

    /// Multi-column printing: rows are arranged into lines of up to
    /// `columns.count` band instances, each line as tall as its tallest row.
    async fn print_columns(
        &mut self,
        id: ComponentId,
        data: &DataBand,
        rows: Range<usize>,
    ) -> Result<(), ReportError> {
        let Some(page) = self.page_template() else {
            return Ok(());
        };
        let bound = !data.data_source.is_empty();
        let columns = data.columns;
        let printable_mm = page.printable_width_mm();
        let positions = columns.positions(printable_mm);
        let column_width = Pt::from_mm(columns.actual_width(printable_mm));
        let rows: Vec<usize> = rows.collect();
        let count = columns.count.max(1);

        let mut lines: Vec<Vec<(usize, usize)>> = Vec::new();
        match columns.layout {
            ColumnLayout::AcrossThenDown => {
                for start in (0..rows.len()).step_by(count) {
                    lines.push(
                        (0..count)
                            .map(|c| (c, start + c))
                            .filter(|(_, index)| *index < rows.len())
                            .collect(),
                    );
                }
            }
            ColumnLayout::DownThenAcross => {
                let per_column = columns.rows_per_column(rows.len());
                let block = per_column * count;
                for start in (0..rows.len()).step_by(block.max(1)) {
                    for line in 0..per_column {
                        let entries: Vec<(usize, usize)> = (0..count)
                            .map(|c| (c, start + c * per_column + line))
                            .filter(|(_, index)| *index < rows.len())
                            .collect();
                        if !entries.is_empty() {
                            lines.push(entries);
                        }
                    }
                }
            }
        }

        for line in lines {
            let mut placed = Vec::with_capacity(line.len());
            let mut line_height = Pt::ZERO;
            for (column, index) in line {
                self.check_cancel()?;
                self.enter_row(data, bound.then_some(rows[index]), index);
                if let Some(instance) = self.prepare_band(id, false, Some(column_width)).await? {
                    line_height = line_height.max(instance.height);
                    placed.push((column, instance));
                }
                self.accumulate_totals(id).await?;
            }
            if placed.is_empty() {
                continue;
            }
            let overflow = self
                .current
                .as_ref()
                .is_some_and(|s| !s.frame.fits(line_height) && !s.frame.is_empty());
            if overflow {
                self.new_page("overflow", id).await?;
            }
            let left = self.left();
            if let Some(state) = self.current.as_mut() {
                let y = state.frame.current_y();
                for (column, instance) in &placed {
                    let x = left + Pt::from_mm(positions[*column]);
                    state.frame.place_at(instance, x, y, &mut state.page);
                    state.band_count += 1;
                }
                state.frame.set_cursor_y(state.frame.cursor_y() + line_height);
            }
            self.reset_totals_after(id);
        }
        Ok(())
    }

    /// Group header chain starting at `id`, outermost first.
    fn group_chain(&self, id: ComponentId) -> Result<Vec<ComponentId>, ReportError> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(component) = self.report.tree.get(current) else {
                break;
            };
            let Some(group) = component.as_band().and_then(|b| b.as_group()) else {
                break;
            };
            if group.condition.trim().is_empty() {
                return Err(ReportError::configuration(
                    component.name(),
                    "group condition is empty",
                ));
            }
            chain.push(current);
            next = group.nested_group;
        }
        Ok(chain)
    }

    fn run_group(&mut self, id: ComponentId) -> LocalBoxFuture<'_, Result<(), ReportError>> {
        async move {
            self.check_cancel()?;
            let chain = self.group_chain(id)?;
            let Some(data_id) = chain
                .last()
                .and_then(|g| self.report.tree.get(*g))
                .and_then(|c| c.as_band())
                .and_then(|b| b.as_group())
                .and_then(|g| g.data)
            else {
                log::warn!("group `{}` has no data band", self.band_name(id));
                return Ok(());
            };

            let entries: Vec<SortSpec> = chain
                .iter()
                .filter_map(|g| {
                    let group = self.report.tree.get(*g)?.as_band()?.as_group()?;
                    match group.sort_order {
                        SortOrder::None => None,
                        SortOrder::Ascending => Some(SortSpec::new(group.condition.clone(), false)),
                        SortOrder::Descending => Some(SortSpec::new(group.condition.clone(), true)),
                    }
                })
                .collect();
            let inserted = match self
                .report
                .tree
                .get_mut(data_id)
                .and_then(|c| c.as_band_mut())
                .and_then(|b| b.as_data_mut())
            {
                Some(data) => data.insert_group_sorts(entries),
                None => 0,
            };
            log::trace!("group `{}` added {inserted} sort entries", self.band_name(id));

            let result = self.run_group_chain(&chain, data_id).await;

            if let Some(data) = self
                .report
                .tree
                .get_mut(data_id)
                .and_then(|c| c.as_band_mut())
                .and_then(|b| b.as_data_mut())
            {
                data.remove_group_sorts(inserted);
            }
            result
        }
        .boxed_local()
    }

    async fn run_group_chain(
        &mut self,
        chain: &[ComponentId],
        data_id: ComponentId,
    ) -> Result<(), ReportError> {
        let Some(data) = self.data_band(data_id) else {
            return Ok(());
        };
        let bound = !data.data_source.is_empty();
        let count = if bound {
            self.init_data_band(data_id, &data).await?
        } else {
            data.row_count
        };
        if count == 0 {
            return Ok(());
        }

        let mut conditions = Vec::with_capacity(chain.len());
        for group in chain {
            let condition = self
                .report
                .tree
                .get(*group)
                .and_then(|c| c.as_band())
                .and_then(|b| b.as_group())
                .map(|g| g.condition.clone())
                .unwrap_or_default();
            conditions.push((self.band_name(*group), condition));
        }
        let mut values = Vec::with_capacity(count);
        for row in 0..count {
            if bound {
                self.report.dictionary.set_position(&data.data_source, row);
            }
            let mut row_values = Vec::with_capacity(chain.len());
            for (name, condition) in &conditions {
                row_values.push(self.calc(name, condition).await?);
            }
            values.push(row_values);
        }

        let scope = GroupScope {
            chain,
            values: &values,
            data_id,
            data: &data,
        };
        self.print_group_level(&scope, 0, 0..count).await
    }

    fn set_group_value(&mut self, group: ComponentId, value: Value) {
        if let Some(group) = self
            .report
            .tree
            .get_mut(group)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_group_mut())
        {
            group.reset_group_value(value);
        }
    }

    /// Splits `range` into runs of equal condition values at `level` and
    /// prints header, contents and footer for each run.
    fn print_group_level<'s>(
        &'s mut self,
        scope: &'s GroupScope<'s>,
        level: usize,
        range: Range<usize>,
    ) -> LocalBoxFuture<'s, Result<(), ReportError>> {
        async move {
            let group_id = scope.chain[level];
            let Some(group) = self
                .report
                .tree
                .get(group_id)
                .and_then(|c| c.as_band())
                .and_then(|b| b.as_group())
                .cloned()
            else {
                return Ok(());
            };
            let bound = !scope.data.data_source.is_empty();

            let mut runs = Vec::new();
            let mut start = range.start;
            self.set_group_value(group_id, scope.values[start][level].clone());
            for row in range.start + 1..range.end {
                let changed = self
                    .report
                    .tree
                    .get(group_id)
                    .and_then(|c| c.as_band())
                    .and_then(|b| b.as_group())
                    .is_some_and(|g| g.group_value_changed(&scope.values[row][level]));
                if changed {
                    runs.push(start..row);
                    start = row;
                    self.set_group_value(group_id, scope.values[row][level].clone());
                }
            }
            runs.push(start..range.end);

            if let Some(header) = group.header {
                self.show_band(header, false).await?;
            }
            for run in runs {
                self.check_cancel()?;
                if bound {
                    self.report
                        .dictionary
                        .set_position(&scope.data.data_source, run.start);
                }
                self.set_group_value(group_id, scope.values[run.start][level].clone());
                self.keep_with_data(group_id, scope.data_id).await?;
                self.show_band(group_id, false).await?;
                let repeats = self.repeats(group_id);
                if repeats {
                    self.repeat_headers.push(group_id);
                }

                let inner = if level + 1 < scope.chain.len() {
                    self.print_group_level(scope, level + 1, run.clone()).await
                } else {
                    self.print_rows(scope.data_id, scope.data, run.clone()).await
                };
                if repeats {
                    self.repeat_headers.retain(|h| *h != group_id);
                }
                inner?;

                // Footers see the last row of their group.
                if bound {
                    self.report
                        .dictionary
                        .set_position(&scope.data.data_source, run.end - 1);
                }
                if let Some(footer) = group.group_footer {
                    self.show_band(footer, false).await?;
                }
            }
            if let Some(footer) = group.footer {
                self.show_band(footer, false).await?;
            }
            Ok(())
        }
        .boxed_local()
    }

    fn is_band_empty(&mut self, id: ComponentId) -> LocalBoxFuture<'_, Result<bool, ReportError>> {
        async move {
            let Some(band) = self.report.tree.get(id).and_then(|c| c.as_band()) else {
                return Ok(true);
            };
            if let Some(group) = band.as_group() {
                let mut data = group.data;
                let mut nested = group.nested_group;
                while let Some(inner) = nested {
                    let group = self
                        .report
                        .tree
                        .get(inner)
                        .and_then(|c| c.as_band())
                        .and_then(|b| b.as_group());
                    data = group.and_then(|g| g.data);
                    nested = group.and_then(|g| g.nested_group);
                }
                return match data {
                    Some(data) => self.is_band_empty(data).await,
                    None => Ok(true),
                };
            }
            let Some(data) = band.as_data().cloned() else {
                return Ok(false);
            };
            if data.data_source.is_empty() {
                return Ok(data.row_count == 0);
            }
            let count = self.init_data_band(id, &data).await?;
            if count == 0 {
                return Ok(!data.print_if_datasource_empty);
            }
            for row in 0..count {
                self.check_cancel()?;
                self.report.dictionary.set_position(&data.data_source, row);
                if !self.is_detail_empty(&data).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        .boxed_local()
    }

    /// True only when the band has detail bands, PrintIfDetailEmpty is off,
    /// and every detail is empty for the current row.
    async fn is_detail_empty(&mut self, data: &DataBand) -> Result<bool, ReportError> {
        if data.print_if_detail_empty || data.details.is_empty() {
            return Ok(false);
        }
        self.masters.push(data.data_source.clone());
        let mut result = Ok(true);
        for detail in &data.details {
            match self.is_band_empty(*detail).await {
                Ok(true) => continue,
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.masters.pop();
        result
    }

    async fn accumulate_totals(&mut self, band: ComponentId) -> Result<(), ReportError> {
        let name = self.band_name(band);
        let targets: Vec<(usize, String)> = self
            .report
            .dictionary
            .totals
            .iter()
            .enumerate()
            .filter(|(_, t)| t.evaluator.eq_ignore_ascii_case(&name))
            .map(|(index, t)| (index, t.expression.clone()))
            .collect();
        for (index, expression) in targets {
            let value = if expression.trim().is_empty() {
                Value::Null
            } else {
                self.calc(&name, &expression).await?
            };
            self.report.dictionary.totals[index].add(&value);
        }
        Ok(())
    }

    fn reset_totals_after(&mut self, band: ComponentId) {
        let name = self.band_name(band);
        for total in &mut self.report.dictionary.totals {
            if total.reset_after_print && total.print_on.eq_ignore_ascii_case(&name) {
                total.reset();
            }
        }
    }
}

struct GroupScope<'s> {
    chain: &'s [ComponentId],
    // Condition value per row and chain level.
    values: &'s [Vec<Value>],
    data_id: ComponentId,
    data: &'s DataBand,
}

/// Objects inside `id` (not attached bands), parents before children.
fn object_descendants(tree: &ComponentTree, id: ComponentId) -> Vec<ComponentId> {
    let mut out = Vec::new();
    let mut stack: Vec<ComponentId> = tree.objects(id).into_iter().rev().collect();
    while let Some(current) = stack.pop() {
        out.push(current);
        stack.extend(tree.objects(current).into_iter().rev());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::BandKind;
    use crate::columns::BandColumns;
    use crate::component::Component;
    use crate::data::{Relation, TableDataSource};
    use crate::debug::tests::SharedBuffer;
    use crate::error::EvalError;
    use crate::prepared::PreparedContent;
    use crate::totals::{Total, TotalKind};
    use futures_util::future::BoxFuture;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn engine() -> ReportEngine {
        ReportEngine::builder().build().expect("engine")
    }

    fn field(name: &str, text: &str) -> Component {
        Component::text(name, Rect::new(0.0, 0.0, 100.0, 12.0), text)
    }

    fn customers_report() -> (Report, ComponentId, ComponentId) {
        let mut report = Report::new("Orders");
        report.register_data(
            TableDataSource::new("Customers", &["Id", "Name"])
                .with_row(vec![1.into(), "Ann".into()])
                .with_row(vec![2.into(), "Bob".into()])
                .with_row(vec![3.into(), "Cy".into()]),
        );
        report.register_data(
            TableDataSource::new("Orders", &["Id", "CustomerId"])
                .with_row(vec![10.into(), 3.into()])
                .with_row(vec![11.into(), 1.into()])
                .with_row(vec![12.into(), 3.into()])
                .with_row(vec![13.into(), 1.into()]),
        );
        report.dictionary.add_relation(Relation::new(
            "CustomerOrders",
            "Customers",
            "Id",
            "Orders",
            "CustomerId",
        ));
        let page = report.add_page("Page1");
        let customers = report
            .add(page, Component::data_band("CustomerBand", "Customers", 20.0))
            .expect("customers");
        report.add(customers, field("Name", "[Customers.Name]"));
        let orders = report
            .add(customers, Component::data_band("OrderBand", "Orders", 20.0))
            .expect("orders");
        report.add(orders, field("OrderId", "[Orders.Id]"));
        (report, customers, orders)
    }

    fn items_report(rows: usize) -> (Report, ComponentId, ComponentId) {
        let mut items = TableDataSource::new("Items", &["Name"]);
        for i in 0..rows {
            items.push_row(vec![format!("Item {i}").into()]);
        }
        let mut report = Report::new("Items");
        report.register_data(items);
        let page = report.add_page("Page1");
        let data = report
            .add(page, Component::data_band("ItemBand", "Items", 20.0))
            .expect("items");
        report.add(data, field("ItemName", "[Items.Name]"));
        (report, page, data)
    }

    #[test]
    fn detail_rows_interleave_with_their_master() {
        init_logging();
        let (mut report, _, _) = customers_report();
        let pages = engine().prepare(&mut report).expect("prepare");
        // Bob has no orders and his row is skipped as detail-empty.
        assert_eq!(
            pages.texts(),
            vec!["Ann", "11", "13", "Cy", "10", "12"]
        );
    }

    #[test]
    fn collect_child_rows_prints_every_masters_children_together() {
        let (mut report, _, orders) = customers_report();
        if let Some(data) = report
            .tree
            .get_mut(orders)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_data_mut())
        {
            data.collect_child_rows = true;
        }
        let pages = engine().prepare(&mut report).expect("prepare");
        let texts = pages.texts();
        assert_eq!(texts[..5], ["Ann", "11", "13", "10", "12"]);
        assert_eq!(texts.len(), 15);
    }

    #[test]
    fn data_band_is_not_empty_when_some_rows_have_details() {
        let (mut report, customers, orders) = customers_report();
        let engine = engine();
        assert!(!engine.is_band_empty(&mut report, customers).expect("empty"));

        if let Some(data) = report
            .tree
            .get_mut(orders)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_data_mut())
        {
            data.filter = "Orders.Id > 100".to_string();
        }
        assert!(engine.is_band_empty(&mut report, customers).expect("empty"));
    }

    #[test]
    fn print_if_detail_empty_keeps_rows_without_children() {
        let (mut report, customers, _) = customers_report();
        if let Some(data) = report
            .tree
            .get_mut(customers)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_data_mut())
        {
            data.print_if_detail_empty = true;
        }
        let pages = engine().prepare(&mut report).expect("prepare");
        assert!(pages.texts().contains(&"Bob".to_string()));
    }

    fn sales_report() -> (Report, ComponentId, ComponentId, ComponentId) {
        let mut report = Report::new("Sales");
        report.register_data(
            TableDataSource::new("Sales", &["Region", "City", "Amount"])
                .with_row(vec!["East".into(), "Boston".into(), 5.into()])
                .with_row(vec!["West".into(), "Austin".into(), 7.into()])
                .with_row(vec!["East".into(), "Albany".into(), 3.into()])
                .with_row(vec!["West".into(), "Austin".into(), 2.into()])
                .with_row(vec!["East".into(), "Boston".into(), 4.into()]),
        );
        report.dictionary.add_total(Total::new(
            "RegionTotal",
            TotalKind::Sum,
            "Sales.Amount",
            "SalesData",
            "RegionFooter",
        ));
        let page = report.add_page("Page1");
        let region = report
            .add(page, Component::group_header("RegionGroup", "Sales.Region", 20.0))
            .expect("region");
        report.add(region, field("RegionName", "[Sales.Region]"));
        let city = report
            .add(region, Component::group_header("CityGroup", "Sales.City", 20.0))
            .expect("city");
        report.add(city, field("CityName", "[Sales.City]"));
        let data = report
            .add(city, Component::data_band("SalesData", "Sales", 20.0))
            .expect("data");
        report.add(data, field("Amount", "[Sales.Amount]"));
        let footer = report
            .add(region, Component::band("RegionFooter", BandKind::GroupFooter, 20.0))
            .expect("footer");
        report.add(footer, field("Total", "[RegionTotal]"));
        (report, region, city, data)
    }

    #[test]
    fn nested_groups_sort_break_and_total() {
        let (mut report, _, _, data) = sales_report();
        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(
            pages.texts(),
            vec![
                "East", "Albany", "3", "Boston", "5", "4", "12", "West", "Austin", "7", "2", "9"
            ]
        );
        let sort = report
            .tree
            .get(data)
            .and_then(|c| c.as_band())
            .and_then(|b| b.as_data())
            .map(|d| d.sort.len());
        assert_eq!(sort, Some(0));
    }

    #[test]
    fn descending_and_unsorted_groups_contribute_only_their_entries() {
        let (mut report, region, city, data) = sales_report();
        if let Some(data) = report
            .tree
            .get_mut(data)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_data_mut())
        {
            data.sort.push(SortSpec::new("Sales.Amount", false));
        }
        let set_order = |report: &mut Report, id: ComponentId, order: SortOrder| {
            if let Some(group) = report
                .tree
                .get_mut(id)
                .and_then(|c| c.as_band_mut())
                .and_then(|b| b.as_group_mut())
            {
                group.sort_order = order;
            }
        };
        set_order(&mut report, region, SortOrder::Descending);
        set_order(&mut report, city, SortOrder::None);
        let pages = engine().prepare(&mut report).expect("prepare");
        // Region descending, then the band's own Amount sort inside it.
        assert_eq!(
            pages.texts(),
            vec![
                "West", "Austin", "2", "7", "9", "East", "Albany", "3", "Boston", "4", "5",
                "12"
            ]
        );
        let sort: Vec<String> = report
            .tree
            .get(data)
            .and_then(|c| c.as_band())
            .and_then(|b| b.as_data())
            .map(|d| d.sort.iter().map(|s| s.expression.clone()).collect())
            .unwrap_or_default();
        assert_eq!(sort, vec!["Sales.Amount"]);
    }

    #[test]
    fn empty_group_condition_fails_naming_the_band() {
        let (mut report, _, city, _) = sales_report();
        if let Some(group) = report
            .tree
            .get_mut(city)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_group_mut())
        {
            group.condition = "  ".to_string();
        }
        let err = engine().prepare(&mut report).expect_err("configuration");
        assert!(matches!(
            err,
            ReportError::Configuration { ref component, .. } if component == "CityGroup"
        ));
    }

    #[test]
    fn failing_expression_aborts_with_context() {
        let (mut report, _, _) = items_report(2);
        let text = report.find("ItemName").expect("text");
        if let Some(text) = report.tree.get_mut(text).and_then(|c| c.as_text_mut()) {
            text.text = "[Items.Missing]".to_string();
        }
        let err = engine().prepare(&mut report).expect_err("expression");
        assert!(matches!(
            err,
            ReportError::Expression { ref component, ref expression, .. }
                if component == "ItemName" && expression == "Items.Missing"
        ));
    }

    #[test]
    fn repeated_header_reprints_on_continuation_pages() {
        let (mut report, _, data) = items_report(60);
        let mut header = Component::band("ItemHeader", BandKind::DataHeader, 20.0);
        if let Some(band) = header.as_band_mut() {
            band.repeat_on_every_page = true;
        }
        let header = report.add(data, header).expect("header");
        report.add(header, field("Caption", "Items"));
        let mut first_only = field("FirstOnly", "once");
        first_only.base.print_on.repeated_band = false;
        report.add(header, first_only);

        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(pages.len(), 2);
        let first = pages.pages[1].bands().next().expect("band");
        assert_eq!(first.name, "ItemHeader");
        assert!(matches!(
            first.content,
            PreparedContent::Band { repeated: true, .. }
        ));
        assert!(pages.pages[0].find("FirstOnly").is_some());
        assert!(pages.pages[1].find("FirstOnly").is_none());
        let rows: usize = pages
            .pages
            .iter()
            .map(|p| p.bands().filter(|b| b.name == "ItemBand").count())
            .sum();
        assert_eq!(rows, 60);
    }

    #[test]
    fn double_pass_knows_the_page_count_in_footers() {
        let (mut report, page, _) = items_report(60);
        let footer = report
            .add(page, Component::band("Footer", BandKind::PageFooter, 20.0))
            .expect("footer");
        report.add(footer, field("PageNo", "[PageNofM]"));

        let single = engine().prepare(&mut report).expect("single");
        assert_eq!(single.pages[0].text_of("PageNo").as_deref(), Some("Page 1 of 0"));

        let engine = ReportEngine::builder()
            .double_pass(true)
            .build()
            .expect("engine");
        let (pages, metrics) = engine.prepare_with_metrics(&mut report).expect("double");
        assert_eq!(metrics.passes, 2);
        assert_eq!(pages.pages[0].text_of("PageNo").as_deref(), Some("Page 1 of 2"));
        assert_eq!(pages.pages[1].text_of("PageNo").as_deref(), Some("Page 2 of 2"));
        let template = report
            .tree
            .get(page)
            .and_then(|c| c.as_page())
            .cloned()
            .expect("page");
        let footer_y = pages.pages[0].find("Footer").expect("footer").bounds.y;
        let bottom = template.top_margin() + template.printable_height() - Pt::from_i32(20);
        assert_eq!(footer_y, bottom);
    }

    #[test]
    fn tall_band_splits_across_pages() {
        let mut report = Report::new("Long");
        let page = report.add_page("Page1");
        let mut band = Component::data_band("Body", "", 20.0);
        band.base.can_grow = true;
        band.base.can_break = true;
        let band = report.add(page, band).expect("band");
        let lines: Vec<String> = (0..100).map(|i| format!("line{i}")).collect();
        let mut memo = field("Memo", &lines.join("\n"));
        memo.base.can_grow = true;
        report.add(band, memo);

        let (pages, metrics) = engine().prepare_with_metrics(&mut report).expect("prepare");
        assert_eq!(pages.len(), 2);
        assert_eq!(metrics.band_breaks, 1);
        let first = pages.pages[0].text_of("Memo").expect("memo");
        let second = pages.pages[1].text_of("Memo").expect("memo");
        assert_eq!(first.lines().count() + second.lines().count(), 100);
        assert!(second.starts_with(&format!("line{}", first.lines().count())));
    }

    #[test]
    fn start_new_page_and_debug_trace() {
        let buffer = SharedBuffer::default();
        let mut report = Report::new("Two");
        let page = report.add_page("Page1");
        report.add(page, Component::data_band("First", "", 20.0));
        let mut second = Component::data_band("Second", "", 20.0);
        if let Some(band) = second.as_band_mut() {
            band.start_new_page = true;
        }
        report.add(page, second);

        let engine = ReportEngine::builder()
            .debug_logger(DebugLogger::from_writer(buffer.clone()))
            .build()
            .expect("engine");
        let pages = engine.prepare(&mut report).expect("prepare");
        assert_eq!(pages.len(), 2);
        let trace = buffer.text();
        assert!(trace.contains("\"type\":\"engine.page_break\""));
        assert!(trace.contains("\"reason\":\"start_new_page\""));
        assert!(trace.contains("\"band\":\"Second\""));
        assert!(trace.contains("\"type\":\"debug.summary\""));
    }

    fn template(report: &Report, page: ComponentId) -> ReportPage {
        report
            .tree
            .get(page)
            .and_then(|c| c.as_page())
            .cloned()
            .expect("page")
    }

    fn band_names(pages: &PreparedPages) -> Vec<Vec<String>> {
        pages
            .pages
            .iter()
            .map(|page| page.bands().map(|b| b.name.clone()).collect())
            .collect()
    }

    fn set_flags(report: &mut Report, id: ComponentId, apply: impl FnOnce(&mut crate::band::Band)) {
        if let Some(band) = report.tree.get_mut(id).and_then(|c| c.as_band_mut()) {
            apply(band);
        }
    }

    #[test]
    fn start_new_page_keeps_the_data_header_with_the_first_row() {
        let (mut report, _, data) = items_report(3);
        set_flags(&mut report, data, |band| band.start_new_page = true);
        report.add(data, Component::band("ItemHeader", BandKind::DataHeader, 20.0));
        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(
            band_names(&pages),
            vec![
                vec!["ItemHeader", "ItemBand"],
                vec!["ItemBand"],
                vec!["ItemBand"]
            ]
        );

        // With something already printed, header and first row move together.
        let mut report = Report::new("Intro");
        let mut items = TableDataSource::new("Items", &["Name"]);
        items.push_row(vec!["a".into()]);
        items.push_row(vec!["b".into()]);
        report.register_data(items);
        let page = report.add_page("Page1");
        report.add(page, Component::data_band("Intro", "", 20.0));
        let data = report
            .add(page, Component::data_band("ItemBand", "Items", 20.0))
            .expect("items");
        set_flags(&mut report, data, |band| band.start_new_page = true);
        report.add(data, Component::band("ItemHeader", BandKind::DataHeader, 20.0));
        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(
            band_names(&pages),
            vec![
                vec!["Intro"],
                vec!["ItemHeader", "ItemBand"],
                vec!["ItemBand"]
            ]
        );
    }

    #[test]
    fn print_on_bottom_footer_sits_at_the_frame_bottom() {
        let (mut report, page, data) = items_report(2);
        let footer = report
            .add(data, Component::band("ItemFooter", BandKind::DataFooter, 15.0))
            .expect("footer");
        set_flags(&mut report, footer, |band| band.print_on_bottom = true);
        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(pages.len(), 1);
        let page = template(&report, page);
        let bottom = page.top_margin() + page.printable_height();
        let footer = pages.pages[0].find("ItemFooter").expect("footer");
        assert_eq!(footer.bounds.y, bottom - Pt::from_i32(15));
        let rows: Vec<Pt> = pages.pages[0]
            .bands()
            .filter(|b| b.name == "ItemBand")
            .map(|b| b.bounds.y)
            .collect();
        assert_eq!(rows, vec![page.top_margin(), page.top_margin() + Pt::from_i32(20)]);
    }

    #[test]
    fn keep_with_data_moves_an_orphaned_header_to_the_next_page() {
        let mut report = Report::new("Keep");
        let mut items = TableDataSource::new("Items", &["Name"]);
        items.push_row(vec!["a".into()]);
        items.push_row(vec!["b".into()]);
        report.register_data(items);
        let page = report.add_page("Page1");
        // Leaves 30pt: room for the header but not for header plus a row.
        let filler = template(&report, page).printable_height() - Pt::from_i32(30);
        report.add(page, Component::data_band("Intro", "", filler.to_f32()));
        let data = report
            .add(page, Component::data_band("ItemBand", "Items", 20.0))
            .expect("items");
        let header = report
            .add(data, Component::band("ItemHeader", BandKind::DataHeader, 20.0))
            .expect("header");
        set_flags(&mut report, header, |band| band.keep_with_data = true);

        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(
            band_names(&pages),
            vec![vec!["Intro"], vec!["ItemHeader", "ItemBand", "ItemBand"]]
        );
        let top = template(&report, page).top_margin();
        assert_eq!(pages.pages[1].find("ItemHeader").expect("header").bounds.y, top);
    }

    #[test]
    fn overlay_covers_the_frame_top_and_summary_follows_the_rows() {
        let (mut report, page, _) = items_report(2);
        let summary = report
            .add(page, Component::band("Summary", BandKind::ReportSummary, 15.0))
            .expect("summary");
        report.add(summary, field("Closing", "done"));
        let overlay = report
            .add(page, Component::band("Watermark", BandKind::Overlay, 50.0))
            .expect("overlay");
        report.add(overlay, field("Stamp", "DRAFT"));

        let pages = engine().prepare(&mut report).expect("prepare");
        let top = template(&report, page).top_margin();
        let printed = &pages.pages[0];
        assert_eq!(printed.find("Summary").expect("summary").bounds.y, top + Pt::from_i32(40));
        assert_eq!(printed.find("Watermark").expect("overlay").bounds.y, top);
        assert_eq!(printed.bands().last().map(|b| b.name.as_str()), Some("Watermark"));
        assert_eq!(pages.texts(), vec!["Item 0", "Item 1", "done", "DRAFT"]);
    }

    #[test]
    fn column_bands_frame_the_rows_inside_page_bands() {
        let (mut report, page, _) = items_report(2);
        report.add(page, Component::band("PageFooter", BandKind::PageFooter, 20.0));
        report.add(page, Component::band("ColumnHeader", BandKind::ColumnHeader, 10.0));
        report.add(page, Component::band("ColumnFooter", BandKind::ColumnFooter, 10.0));

        let pages = engine().prepare(&mut report).expect("prepare");
        let template = template(&report, page);
        let top = template.top_margin();
        let bottom = top + template.printable_height();
        let printed = &pages.pages[0];
        let y = |name: &str| printed.find(name).expect(name).bounds.y;
        assert_eq!(y("ColumnHeader"), top);
        assert_eq!(y("ItemBand"), top + Pt::from_i32(10));
        assert_eq!(y("PageFooter"), bottom - Pt::from_i32(20));
        assert_eq!(y("ColumnFooter"), bottom - Pt::from_i32(30));
    }

    #[test]
    fn multi_column_rows_fill_down_then_across() {
        let (mut report, page, data) = items_report(5);
        if let Some(data) = report
            .tree
            .get_mut(data)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_data_mut())
        {
            data.columns = BandColumns {
                count: 3,
                layout: ColumnLayout::DownThenAcross,
                ..BandColumns::default()
            };
        }
        let pages = engine().prepare(&mut report).expect("prepare");
        // Two rows per column: 0 1 | 2 3 | 4, printed line by line.
        assert_eq!(
            pages.texts(),
            vec!["Item 0", "Item 2", "Item 4", "Item 1", "Item 3"]
        );
        let bands: Vec<Rect> = pages.pages[0].bands().map(|b| b.bounds).collect();
        let top = template(&report, page).top_margin();
        let left = Pt::from_mm(10.0);
        let column = Pt::from_mm(190.0 / 3.0);
        assert_eq!(bands[0].x, left);
        assert_eq!(bands[1].x, left + column);
        assert_eq!(bands[2].x, left + column + column);
        assert_eq!(bands[2].y, top);
        assert_eq!(bands[3].x, left);
        assert_eq!(bands[3].y, top + Pt::from_i32(20));
        assert_eq!(bands[4].x, left + column);
    }

    #[test]
    fn three_level_group_chain_restores_the_band_sort() {
        let mut report = Report::new("Channels");
        report.register_data(
            TableDataSource::new("Sales", &["Region", "City", "Channel", "Amount"])
                .with_row(vec!["East".into(), "Boston".into(), "Web".into(), 5.into()])
                .with_row(vec!["East".into(), "Boston".into(), "Shop".into(), 4.into()])
                .with_row(vec!["West".into(), "Austin".into(), "Web".into(), 7.into()])
                .with_row(vec!["East".into(), "Albany".into(), "Shop".into(), 3.into()])
                .with_row(vec!["East".into(), "Boston".into(), "Web".into(), 1.into()]),
        );
        let page = report.add_page("Page1");
        let region = report
            .add(page, Component::group_header("RegionGroup", "Sales.Region", 20.0))
            .expect("region");
        report.add(region, field("RegionName", "[Sales.Region]"));
        let city = report
            .add(region, Component::group_header("CityGroup", "Sales.City", 20.0))
            .expect("city");
        report.add(city, field("CityName", "[Sales.City]"));
        let channel = report
            .add(city, Component::group_header("ChannelGroup", "Sales.Channel", 20.0))
            .expect("channel");
        report.add(channel, field("ChannelName", "[Sales.Channel]"));
        let mut data = Component::data_band("SalesData", "Sales", 20.0);
        if let Some(data) = data.as_band_mut().and_then(|b| b.as_data_mut()) {
            data.sort.push(SortSpec::new("Sales.Amount", false));
        }
        let data = report.add(channel, data).expect("data");
        report.add(data, field("Amount", "[Sales.Amount]"));

        let expected = vec![
            "East", "Albany", "Shop", "3", "Boston", "Shop", "4", "Web", "1", "5", "West",
            "Austin", "Web", "7",
        ];
        let sort = |report: &Report| -> Vec<SortSpec> {
            report
                .tree
                .get(data)
                .and_then(|c| c.as_band())
                .and_then(|b| b.as_data())
                .map(|d| d.sort.clone())
                .unwrap_or_default()
        };
        for _ in 0..2 {
            let pages = engine().prepare(&mut report).expect("prepare");
            assert_eq!(pages.texts(), expected);
            assert_eq!(sort(&report), vec![SortSpec::new("Sales.Amount", false)]);
        }
    }

    #[test]
    fn multi_column_rows_fill_across_then_down() {
        let (mut report, _, data) = items_report(5);
        if let Some(data) = report
            .tree
            .get_mut(data)
            .and_then(|c| c.as_band_mut())
            .and_then(|b| b.as_data_mut())
        {
            data.columns = BandColumns {
                count: 3,
                ..BandColumns::default()
            };
        }
        let pages = engine().prepare(&mut report).expect("prepare");
        let bands: Vec<Rect> = pages.pages[0].bands().map(|b| b.bounds).collect();
        assert_eq!(bands.len(), 5);
        let width = Pt::from_mm(190.0 / 3.0);
        let left = Pt::from_mm(10.0);
        assert_eq!(bands[0].x, left);
        assert_eq!(bands[1].x, left + Pt::from_mm(190.0 / 3.0));
        assert_eq!(bands[1].y, bands[0].y);
        assert_eq!(bands[0].width, width);
        assert_eq!(bands[3].x, left);
        assert_eq!(bands[3].y, bands[0].y + Pt::from_i32(20));
    }

    #[test]
    fn hierarchy_indents_and_narrows_nested_rows() {
        let mut report = Report::new("Tree");
        report.register_data(
            TableDataSource::new("Nodes", &["Id", "Parent", "Name"])
                .with_row(vec![1.into(), Value::Null, "root".into()])
                .with_row(vec![2.into(), 1.into(), "child".into()]),
        );
        let page = report.add_page("Page1");
        let mut band = Component::data_band("NodeBand", "Nodes", 20.0);
        if let Some(data) = band.as_band_mut().and_then(|b| b.as_data_mut()) {
            data.id_column = "Id".to_string();
            data.parent_id_column = "Parent".to_string();
        }
        let band = report.add(page, band).expect("band");
        report.add(band, field("NodeName", "[Nodes.Name]"));

        let pages = engine().prepare(&mut report).expect("prepare");
        let bands: Vec<Rect> = pages.pages[0].bands().map(|b| b.bounds).collect();
        let printable = Pt::from_mm(190.0);
        assert_eq!(bands[1].x - bands[0].x, Pt::from_i32(20));
        assert_eq!(bands[0].width, printable);
        assert_eq!(bands[1].width, printable - Pt::from_i32(20));
    }

    #[test]
    fn print_if_datasource_empty_prints_header_band_and_footer() {
        let mut report = Report::new("Empty");
        report.register_data(TableDataSource::new("Nothing", &["Name"]));
        let page = report.add_page("Page1");
        let mut band = Component::data_band("NothingBand", "Nothing", 20.0);
        if let Some(data) = band.as_band_mut().and_then(|b| b.as_data_mut()) {
            data.print_if_datasource_empty = true;
        }
        let band = report.add(page, band).expect("band");
        report.add(band, Component::band("NothingHeader", BandKind::DataHeader, 10.0));
        let pages = engine().prepare(&mut report).expect("prepare");
        let names: Vec<&str> = pages.pages[0].bands().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["NothingHeader", "NothingBand"]);
    }

    #[test]
    fn break_to_hands_overflow_to_the_child_band() {
        let mut report = Report::new("Break");
        let page = report.add_page("Page1");
        let band = report
            .add(page, Component::data_band("Body", "", 30.0))
            .expect("band");
        let source = report
            .add(
                band,
                Component::text("Source", Rect::new(0.0, 0.0, 30.0, 24.0), "aaaa bbbb cccc dddd"),
            )
            .expect("source");
        let child = report
            .add(band, Component::band("More", BandKind::Child, 30.0))
            .expect("child");
        let target = report
            .add(child, Component::text("Target", Rect::new(0.0, 0.0, 30.0, 24.0), ""))
            .expect("target");
        assert!(report.tree.set_break_to(source, Some(target)));

        let pages = engine().prepare(&mut report).expect("prepare");
        assert_eq!(pages.pages[0].text_of("Source").as_deref(), Some("aaaa\nbbbb"));
        assert_eq!(pages.pages[0].text_of("Target").as_deref(), Some("cccc\ndddd"));

        // Design state is untouched, so a second run prints the same.
        let again = engine().prepare(&mut report).expect("prepare");
        assert_eq!(again, pages);
    }

    #[test]
    fn missing_picture_prints_an_error_placeholder() {
        init_logging();
        let mut report = Report::new("Pictures");
        let page = report.add_page("Page1");
        let band = report
            .add(page, Component::data_band("Body", "", 40.0))
            .expect("band");
        report.add(
            band,
            Component::picture(
                "Logo",
                Rect::new(0.0, 0.0, 40.0, 40.0),
                "/nonexistent/fastreport/logo.png",
            ),
        );
        let pages = engine().prepare(&mut report).expect("prepare");
        let logo = pages.pages[0].find("Logo").expect("logo");
        assert!(matches!(
            &logo.content,
            PreparedContent::Picture { resource_id: None, error: Some(_), .. }
        ));
        assert!(pages.images().is_empty());
    }

    #[test]
    fn empty_report_is_an_error() {
        let mut report = Report::new("Nothing");
        assert!(matches!(
            engine().prepare(&mut report),
            Err(ReportError::EmptyReport)
        ));
    }

    // Suspends once before answering, like an evaluator waiting on I/O.
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    struct SuspendingEvaluator;

    impl Evaluator for SuspendingEvaluator {
        fn calc(&self, expression: &str, context: &DataContext<'_>) -> Result<Value, EvalError> {
            ColumnEvaluator.calc(expression, context)
        }

        fn calc_async<'a>(
            &'a self,
            expression: &'a str,
            context: &'a DataContext<'a>,
        ) -> BoxFuture<'a, Result<Value, EvalError>> {
            async move {
                YieldOnce(false).await;
                self.calc(expression, context)
            }
            .boxed()
        }
    }

    #[test]
    fn sync_and_async_paths_produce_identical_pages() {
        let (mut sync_report, _, _, _) = sales_report();
        let (mut async_report, _, _, _) = sales_report();
        let sync_pages = engine().prepare(&mut sync_report).expect("sync");
        let engine = ReportEngine::builder()
            .evaluator(SuspendingEvaluator)
            .build()
            .expect("engine");
        let token = CancellationToken::new();
        let async_pages =
            pollster::block_on(engine.prepare_async(&mut async_report, &token)).expect("async");
        assert_eq!(sync_pages, async_pages);
    }

    struct CancelAtRow {
        token: CancellationToken,
        row: usize,
    }

    impl Evaluator for CancelAtRow {
        fn calc(&self, expression: &str, context: &DataContext<'_>) -> Result<Value, EvalError> {
            if context.dictionary().system().row == self.row {
                self.token.cancel();
            }
            ColumnEvaluator.calc(expression, context)
        }
    }

    #[test]
    fn cancellation_stops_the_pass() {
        let (mut report, _, _) = items_report(10);
        let token = CancellationToken::new();
        token.cancel();
        let result = pollster::block_on(engine().prepare_async(&mut report, &token));
        assert!(matches!(result, Err(ReportError::Cancelled)));

        let token = CancellationToken::new();
        let engine = ReportEngine::builder()
            .evaluator(CancelAtRow {
                token: token.clone(),
                row: 3,
            })
            .build()
            .expect("engine");
        let result = pollster::block_on(engine.prepare_async(&mut report, &token));
        assert!(matches!(result, Err(ReportError::Cancelled)));
    }

    #[test]
    fn metrics_count_pages_rows_and_objects() {
        let (mut report, _, _) = items_report(60);
        let (pages, metrics) = engine().prepare_with_metrics(&mut report).expect("prepare");
        assert_eq!(metrics.pages.len(), pages.len());
        assert_eq!(metrics.rows_processed, 60);
        assert_eq!(metrics.total_objects(), 60);
        assert_eq!(metrics.pages[0].page_number, 1);
    }
}
