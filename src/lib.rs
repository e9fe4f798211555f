//! Banded report engine: a component tree of pages, bands and report objects
//! bound to data sources, laid out with grow/shrink/shift rules and paginated
//! into prepared pages.

mod band;
mod binding;
mod canvas;
mod columns;
mod component;
mod data;
mod debug;
mod engine;
mod error;
mod evaluator;
mod frame;
mod layout;
mod metrics;
mod objects;
mod page;
mod prepared;
mod registry;
mod report;
mod resource;
mod serialize;
mod style;
mod totals;
mod tree;
mod types;
mod value;

pub use band::{
    Band, BandCapabilities, BandKind, DataBand, GroupHeaderBand, SortOrder, SortSpec,
};
pub use canvas::{ApproxTextMeasurer, Canvas, Command, Document, Page, TextMeasurer};
pub use columns::{BandColumns, ColumnLayout};
pub use component::{
    Anchor, Component, ComponentBase, ComponentId, Dock, ObjectKind, PrintOn, ShiftMode,
};
pub use data::{DataSource, Dictionary, Parameter, Relation, SystemVariables, TableDataSource};
pub use engine::{CancellationToken, EngineBuilder, ReportEngine};
pub use error::{EvalError, ReportError};
pub use evaluator::{ColumnEvaluator, DataContext, Evaluator, TextPart, split_expressions};
pub use frame::{AddResult, Frame};
pub use layout::{LayoutListener, NoopLayoutListener, calc_height, compute_shifts};
pub use metrics::{PageMetrics, PrepareMetrics};
pub use objects::{
    ContainerObject, ImageState, LineObject, LoadedImage, PictureObject, ShapeKind, ShapeObject,
    SizeMode, TableColumn, TableObject, TableRow, TextObject,
};
pub use page::ReportPage;
pub use prepared::{
    BandInstance, PreparedContent, PreparedObject, PreparedPage, PreparedPages, snapshot_band,
};
pub use registry::{ComponentFactory, ComponentRegistry};
pub use report::Report;
pub use resource::{FileResourceLoader, ResourceLoader};
pub use serialize::{read_report, write_report};
pub use style::{Border, BorderLine, BorderLines, Fill, Font, HorzAlign, LineStyle, VertAlign};
pub use totals::{Total, TotalKind};
pub use tree::{ComponentTree, SavedState};
pub use types::{Color, Margins, Padding, Pt, Rect, Size};
pub use value::Value;
