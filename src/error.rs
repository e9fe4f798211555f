use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid configuration in `{component}`: {message}")]
    Configuration { component: String, message: String },
    #[error("error evaluating `{expression}` in `{component}`: {source}")]
    Expression {
        component: String,
        expression: String,
        #[source]
        source: EvalError,
    },
    #[error("unknown data source `{0}`")]
    UnknownDataSource(String),
    #[error("report has no pages")]
    EmptyReport,
    #[error("report preparation was cancelled")]
    Cancelled,
    #[error("malformed report document: {0}")]
    Format(String),
    #[error("xml error: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    pub(crate) fn configuration(component: &str, message: impl Into<String>) -> Self {
        ReportError::Configuration {
            component: component.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn expression(component: &str, expression: &str, source: EvalError) -> Self {
        ReportError::Expression {
            component: component.to_string(),
            expression: expression.to_string(),
            source,
        }
    }
}

/// Failure reported by an [`Evaluator`](crate::Evaluator).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{0}")]
    Message(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn expression_error_names_component_and_expression() {
        let err = ReportError::expression(
            "Text1",
            "[Orders.Missing]",
            EvalError::UnknownIdentifier("Orders.Missing".to_string()),
        );
        let text = err.to_string();
        assert!(text.contains("Text1"));
        assert!(text.contains("[Orders.Missing]"));
        assert!(err.source().is_some());
    }
}
