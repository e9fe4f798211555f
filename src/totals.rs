use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalKind {
    #[default]
    Sum,
    Min,
    Max,
    Avg,
    Count,
}

impl TotalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TotalKind::Sum => "Sum",
            TotalKind::Min => "Min",
            TotalKind::Max => "Max",
            TotalKind::Avg => "Avg",
            TotalKind::Count => "Count",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Sum" => Some(TotalKind::Sum),
            "Min" => Some(TotalKind::Min),
            "Max" => Some(TotalKind::Max),
            "Avg" => Some(TotalKind::Avg),
            "Count" => Some(TotalKind::Count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Accumulator {
    float_sum: f64,
    int_sum: i64,
    all_int: bool,
    count: usize,
    min: Option<Value>,
    max: Option<Value>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            float_sum: 0.0,
            int_sum: 0,
            all_int: true,
            count: 0,
            min: None,
            max: None,
        }
    }
}

/// Running aggregate over the rows printed by one data band.
///
/// `evaluator` names the data band whose rows feed the total; `print_on` names
/// the band after which the total resets (when `reset_after_print` is set).
#[derive(Debug, Clone, PartialEq)]
pub struct Total {
    pub name: String,
    pub kind: TotalKind,
    pub expression: String,
    pub evaluator: String,
    pub print_on: String,
    pub reset_after_print: bool,
    acc: Accumulator,
}

impl Total {
    pub fn new(
        name: impl Into<String>,
        kind: TotalKind,
        expression: impl Into<String>,
        evaluator: impl Into<String>,
        print_on: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            expression: expression.into(),
            evaluator: evaluator.into(),
            print_on: print_on.into(),
            reset_after_print: true,
            acc: Accumulator::default(),
        }
    }

    pub fn add(&mut self, value: &Value) {
        if self.kind == TotalKind::Count {
            if self.expression.trim().is_empty() || !value.is_null() {
                self.acc.count += 1;
            }
            return;
        }
        if value.is_null() {
            return;
        }
        self.acc.count += 1;
        match value {
            Value::Int(v) => {
                self.acc.int_sum = self.acc.int_sum.saturating_add(*v);
                self.acc.float_sum += *v as f64;
            }
            other => {
                self.acc.all_int = false;
                self.acc.float_sum += other.as_f64().unwrap_or(0.0);
            }
        }
        let replace_min = self
            .acc
            .min
            .as_ref()
            .is_none_or(|min| value.sort_cmp(min).is_lt());
        if replace_min {
            self.acc.min = Some(value.clone());
        }
        let replace_max = self
            .acc
            .max
            .as_ref()
            .is_none_or(|max| value.sort_cmp(max).is_gt());
        if replace_max {
            self.acc.max = Some(value.clone());
        }
    }

    pub fn reset(&mut self) {
        self.acc = Accumulator::default();
    }

    pub fn value(&self) -> Value {
        match self.kind {
            TotalKind::Count => Value::Int(self.acc.count as i64),
            TotalKind::Sum if self.acc.all_int => Value::Int(self.acc.int_sum),
            TotalKind::Sum => Value::Float(self.acc.float_sum),
            TotalKind::Avg if self.acc.count == 0 => Value::Null,
            TotalKind::Avg => Value::Float(self.acc.float_sum / self.acc.count as f64),
            TotalKind::Min => self.acc.min.clone().unwrap_or(Value::Null),
            TotalKind::Max => self.acc.max.clone().unwrap_or(Value::Null),
        }
    }
}
