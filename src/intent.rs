//! Intent catalog and action registry
//!
//! The classifier answers in free text. That text is validated here against
//! a closed set of [`Intent`]s; anything else, including the `null` sentinel,
//! means no action.

use std::collections::BTreeSet;

/// Classifier output meaning "no match"
pub const NO_MATCH: &str = "null";

/// Alternative "unknown" answer some models give instead of [`NO_MATCH`]
pub const UNKNOWN: &str = "نامشخص";

/// A recognized user intent with a registered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Intent {
    OwnReport,
    AhmadWorkReport,
    AhmadReport,
    AliReport,
    SaraReport,
    MohammadReport,
    AhmadActivity,
    TodayReports,
    AllReports,
    AllTodayReports,
    EveryTodayReport,
    WeeklySalesAnalysis,
    LastMonthSales,
    QuarterSalesStats,
    WeeklyFeedbackAnalysis,
    LastMonthFeedback,
    QuarterFeedback,
    WeeklyProfitAnalysis,
    LastMonthProfit,
    QuarterProfit,
    ReportFileForAhmad,
    ProjectDocumentForAli,
    ContractForSara,
    FinanceFileForMohammad,
    DocumentForManager,
    TaskReminder,
    CompetitorAnalysis,
    TeamMessage,
    MonthlyPerformanceReport,
}

impl Intent {
    /// Every intent, in catalog order
    pub const ALL: [Self; 29] = [
        Self::OwnReport,
        Self::AhmadWorkReport,
        Self::AhmadReport,
        Self::AliReport,
        Self::SaraReport,
        Self::MohammadReport,
        Self::AhmadActivity,
        Self::TodayReports,
        Self::AllReports,
        Self::AllTodayReports,
        Self::EveryTodayReport,
        Self::WeeklySalesAnalysis,
        Self::LastMonthSales,
        Self::QuarterSalesStats,
        Self::WeeklyFeedbackAnalysis,
        Self::LastMonthFeedback,
        Self::QuarterFeedback,
        Self::WeeklyProfitAnalysis,
        Self::LastMonthProfit,
        Self::QuarterProfit,
        Self::ReportFileForAhmad,
        Self::ProjectDocumentForAli,
        Self::ContractForSara,
        Self::FinanceFileForMohammad,
        Self::DocumentForManager,
        Self::TaskReminder,
        Self::CompetitorAnalysis,
        Self::TeamMessage,
        Self::MonthlyPerformanceReport,
    ];

    /// The exact label the classifier is asked to answer with
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OwnReport => "گزارش خودم",
            Self::AhmadWorkReport => "گزارش کار احمد",
            Self::AhmadReport => "گزارش احمد",
            Self::AliReport => "گزارش علی",
            Self::SaraReport => "گزارش سارا",
            Self::MohammadReport => "گزارش محمد",
            Self::AhmadActivity => "فعالیت همکار احمد",
            Self::TodayReports => "گزارشات امروز",
            Self::AllReports => "همه گزارشات",
            Self::AllTodayReports => "کل گزارشات امروز",
            Self::EveryTodayReport => "تمام گزارشات امروز",
            Self::WeeklySalesAnalysis => "تحلیل فروش یک هفته",
            Self::LastMonthSales => "فروش ماه گذشته",
            Self::QuarterSalesStats => "آمار فروش سه ماه",
            Self::WeeklyFeedbackAnalysis => "تحلیل بازخورد هفتگی",
            Self::LastMonthFeedback => "نظرات ماه گذشته",
            Self::QuarterFeedback => "بازخورد سه ماه",
            Self::WeeklyProfitAnalysis => "تحلیل سودآوری هفتگی",
            Self::LastMonthProfit => "سودآوری ماه گذشته",
            Self::QuarterProfit => "سود سه ماه",
            Self::ReportFileForAhmad => "فایل گزارش برای احمد",
            Self::ProjectDocumentForAli => "سند پروژه برای علی",
            Self::ContractForSara => "ارسال قرارداد برای سارا",
            Self::FinanceFileForMohammad => "فایل مالی برای محمد",
            Self::DocumentForManager => "ارسال سند برای مدیر",
            Self::TaskReminder => "یادآوری وظایف",
            Self::CompetitorAnalysis => "تحلیل رقبا",
            Self::TeamMessage => "ارسال پیام به تیم",
            Self::MonthlyPerformanceReport => "گزارش عملکرد ماهانه",
        }
    }

    /// Look up an intent by its exact label
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|intent| intent.label() == label)
    }

    /// Text produced when the action runs
    #[must_use]
    pub const fn action_text(self) -> &'static str {
        match self {
            Self::OwnReport => "گزارش آماده است: فعالیت‌های امروز شما ثبت و جمع‌بندی شد.",
            Self::AhmadWorkReport => "گزارش آماده است: کارهای انجام‌شده احمد در این هفته.",
            Self::AhmadReport => "گزارش آماده است: خلاصه عملکرد احمد.",
            Self::AliReport => "گزارش آماده است: خلاصه عملکرد علی.",
            Self::SaraReport => "گزارش آماده است: خلاصه عملکرد سارا.",
            Self::MohammadReport => "گزارش آماده است: خلاصه عملکرد محمد.",
            Self::AhmadActivity => "گزارش آماده است: فعالیت‌های اخیر احمد در سیستم.",
            Self::TodayReports => "گزارش آماده است: گزارش‌های ثبت‌شده امروز.",
            Self::AllReports => "گزارش آماده است: فهرست همه گزارش‌ها.",
            Self::AllTodayReports | Self::EveryTodayReport => {
                "گزارش آماده است: تمام گزارش‌های امروز همکاران."
            }
            Self::WeeklySalesAnalysis => "گزارش آماده است: تحلیل فروش هفت روز گذشته.",
            Self::LastMonthSales => "گزارش آماده است: فروش ماه گذشته.",
            Self::QuarterSalesStats => "گزارش آماده است: آمار فروش سه ماه اخیر.",
            Self::WeeklyFeedbackAnalysis => "گزارش آماده است: تحلیل بازخورد مشتریان در هفته گذشته.",
            Self::LastMonthFeedback => "گزارش آماده است: نظرات مشتریان در ماه گذشته.",
            Self::QuarterFeedback => "گزارش آماده است: بازخورد مشتریان در سه ماه اخیر.",
            Self::WeeklyProfitAnalysis => "گزارش آماده است: تحلیل سودآوری هفتگی.",
            Self::LastMonthProfit => "گزارش آماده است: سودآوری ماه گذشته.",
            Self::QuarterProfit => "گزارش آماده است: سود سه ماه اخیر.",
            Self::ReportFileForAhmad => "فایل گزارش برای احمد ارسال شد.",
            Self::ProjectDocumentForAli => "سند پروژه برای علی ارسال شد.",
            Self::ContractForSara => "قرارداد برای سارا ارسال شد.",
            Self::FinanceFileForMohammad => "فایل مالی برای محمد ارسال شد.",
            Self::DocumentForManager => "سند برای مدیر ارسال شد.",
            Self::TaskReminder => "یادآوری وظایف برای همکاران ثبت شد.",
            Self::CompetitorAnalysis => "گزارش آماده است: تحلیل رقبا.",
            Self::TeamMessage => "پیام برای اعضای تیم ارسال شد.",
            Self::MonthlyPerformanceReport => "گزارش آماده است: عملکرد ماهانه تیم.",
        }
    }
}

/// Labels joined the way the classification prompt lists them
#[must_use]
pub fn catalog() -> String {
    Intent::ALL
        .iter()
        .map(|intent| intent.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set of intents whose actions may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRegistry {
    intents: BTreeSet<Intent>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new(Intent::ALL)
    }
}

impl ActionRegistry {
    /// Register only the given intents
    #[must_use]
    pub fn new(intents: impl IntoIterator<Item = Intent>) -> Self {
        Self {
            intents: intents.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, intent: Intent) -> bool {
        self.intents.contains(&intent)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Validate raw classifier output.
    ///
    /// The output is trimmed and compared exactly. Sentinels, unknown labels
    /// and unregistered intents all resolve to `None`.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> Option<Intent> {
        let label = raw.trim();
        if label.is_empty() || label == NO_MATCH || label == UNKNOWN {
            return None;
        }
        Intent::from_label(label).filter(|intent| self.contains(*intent))
    }

    /// Run the action for `intent` and return its text
    #[must_use]
    pub fn execute(&self, intent: Intent) -> &'static str {
        tracing::info!(intent = intent.label(), "executing action");
        intent.action_text()
    }
}

/// Append an action's output to the reply on its own line
#[must_use]
pub fn merge_reply(reply: &str, action_text: Option<&str>) -> String {
    match action_text {
        Some(text) if !text.is_empty() => format!("{reply}\n{text}"),
        _ => reply.to_string(),
    }
}
