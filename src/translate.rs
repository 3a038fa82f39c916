//! Backend error text to user-facing messages.
//!
//! Known backend substrings map to fixed messages in the configured display
//! language; anything unrecognised passes through untouched so server-side
//! validation text still reaches the user.

use crate::config::Language;

struct KnownError {
    markers: &'static [&'static str],
    arabic: &'static str,
    english: &'static str,
}

const KNOWN_ERRORS: &[KnownError] = &[
    KnownError {
        markers: &[
            "cannot reach",
            "failed to fetch",
            "connection refused",
            "network error",
            "dns",
        ],
        arabic: "تعذر الاتصال بالخادم، تحقق من اتصال الشبكة",
        english: "Cannot reach the server. Check your network connection.",
    },
    KnownError {
        markers: &["timed out", "timeout"],
        arabic: "انتهت مهلة الاتصال بالخادم",
        english: "The server took too long to respond.",
    },
    KnownError {
        markers: &["duplicate entry", "already exists"],
        arabic: "هذا السجل موجود بالفعل",
        english: "This record already exists.",
    },
    KnownError {
        markers: &["foreign key constraint", "cannot delete or update a parent row"],
        arabic: "لا يمكن حذف هذا السجل لارتباطه بسجلات أخرى",
        english: "This record is used elsewhere and cannot be removed.",
    },
    KnownError {
        markers: &["insufficient balance"],
        arabic: "الرصيد غير كافٍ",
        english: "Insufficient balance.",
    },
    KnownError {
        markers: &["insufficient quantity", "insufficient stock"],
        arabic: "الكمية المتوفرة غير كافية",
        english: "Not enough stock available.",
    },
    KnownError {
        markers: &["http 404", "not found"],
        arabic: "العنصر المطلوب غير موجود",
        english: "The requested item was not found.",
    },
    KnownError {
        markers: &["http 500", "internal server error"],
        arabic: "حدث خطأ في الخادم، حاول مرة أخرى لاحقاً",
        english: "Server error. Please try again later.",
    },
];

/// Message shown when the relogin flow starts.
pub fn session_expired_message(language: Language) -> &'static str {
    match language {
        Language::Arabic => "انتهت صلاحية الجلسة، يرجى تسجيل الدخول مرة أخرى",
        Language::English => "Your session has expired. Please log in again.",
    }
}

pub fn translate_error(message: &str, language: Language) -> String {
    let lower = message.to_lowercase();
    for known in KNOWN_ERRORS {
        if known.markers.iter().any(|marker| lower.contains(marker)) {
            return match language {
                Language::Arabic => known.arabic,
                Language::English => known.english,
            }
            .to_string();
        }
    }
    message.to_string()
}
