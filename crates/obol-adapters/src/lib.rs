//! Provider adapter contracts and the closed per-portal adapter registry.
//!
//! An adapter is pure data: it names its provider, carries the declarative
//! automation script that drives the portal remotely, and classifies raw
//! outcomes. Actually executing a script is the transport's concern, so the
//! automation capability can be swapped without touching extraction logic.

mod aade;
mod cosmote;
mod deh;
mod efka;
mod eydap;
mod taxisnet;

use obol_core::{ErrorCode, ProviderId, ScrapeOutcome};

pub use aade::AadeAdapter;
pub use cosmote::CosmoteAdapter;
pub use deh::DehAdapter;
pub use efka::EfkaAdapter;
pub use eydap::EydapAdapter;

pub const CRATE_NAME: &str = "obol-adapters";

pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Bill type recorded when a fragment does not carry its own.
    fn default_bill_type(&self) -> &'static str;

    /// The complete automation program submitted to the remote capability.
    /// Credentials are read from the execution context inside the script;
    /// they are never interpolated into this text.
    fn script(&self) -> String;

    /// Post-process a raw outcome. Scripts set an error code on every failure
    /// branch they control; this fills in a classified code for uncaught
    /// failures that surfaced with only a message.
    fn finalize(&self, outcome: ScrapeOutcome) -> ScrapeOutcome {
        classify_outcome(outcome)
    }
}

/// Registry lookup keyed by provider identifier. Unknown identifiers yield
/// `None`, which the orchestrator converts into a `PROVIDER_NOT_FOUND`
/// outcome.
pub fn adapter_for_provider(provider_id: &str) -> Option<Box<dyn ProviderAdapter>> {
    match ProviderId::parse(provider_id)? {
        ProviderId::Deh => Some(Box::new(DehAdapter)),
        ProviderId::Eydap => Some(Box::new(EydapAdapter)),
        ProviderId::Cosmote => Some(Box::new(CosmoteAdapter)),
        ProviderId::Aade => Some(Box::new(AadeAdapter)),
        ProviderId::Efka => Some(Box::new(EfkaAdapter)),
    }
}

/// Fill in a classified error code on failed outcomes that arrived without
/// one, keyed off the failure message the portal or driver produced.
pub fn classify_outcome(mut outcome: ScrapeOutcome) -> ScrapeOutcome {
    if outcome.success || outcome.error_code.is_some() {
        return outcome;
    }
    let message = outcome.error.as_deref().unwrap_or_default();
    outcome.error_code = Some(classify_error_message(message));
    outcome
}

fn classify_error_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("otp")
        || lower.contains("2fa")
        || lower.contains("one-time")
        || lower.contains("sms code")
        || lower.contains("μιας χρήσης")
    {
        ErrorCode::TwoFactorRequired
    } else if lower.contains("login rejected")
        || lower.contains("login failed")
        || lower.contains("invalid credential")
        || lower.contains("incorrect password")
        || lower.contains("λανθασμέν")
    {
        ErrorCode::LoginFailed
    } else if lower.contains("not found")
        || lower.contains("no such element")
        || lower.contains("selector")
        || lower.contains("waiting for")
    {
        ErrorCode::LoginFormNotFound
    } else {
        ErrorCode::ScraperError
    }
}

/// Shared script prelude: debug/bill accumulators, categorized failure
/// helper, selector-candidate utilities, and the generic extraction
/// strategies A (structured container scan) and C (free-text line scan).
/// Strategy B is provider-specific and lives in each adapter body.
const PRELUDE: &str = r##"
module.exports = async ({ page, context }) => {
  const debug = [];
  const bills = [];

  const fail = (code, message) => {
    const err = new Error(message);
    err.code = code;
    throw err;
  };

  const AMOUNT_RE = '(\\d{1,3}(?:\\.\\d{3})*,\\d{2}|\\d{1,3}(?:,\\d{3})*\\.\\d{2}|\\d+[.,]\\d{2})\\s*(?:€|EUR)?';
  const DATE_RE = '(\\d{1,2}[\\/\\.\\-]\\d{1,2}[\\/\\.\\-]\\d{4}|\\d{4}-\\d{2}-\\d{2}|\\d{1,2}\\s+[Α-Ωα-ωA-Za-z]{3,}\\.?\\s+\\d{4})';
  const REF_RE = '([A-Z]{0,4}\\d{6,20})';

  const firstMatch = async (selectors) => {
    for (const selector of selectors) {
      const el = await page.$(selector);
      if (el) return { el, selector };
    }
    return null;
  };

  const typeInto = async (selectors, value, label) => {
    const found = await firstMatch(selectors);
    if (!found) fail('LOGIN_FORM_NOT_FOUND', 'login field not found: ' + label);
    debug.push({ step: 'type_' + label, message: found.selector });
    await found.el.type(value, { delay: 20 });
  };

  const clickAndWait = async (selectors, label) => {
    const found = await firstMatch(selectors);
    if (!found) fail('LOGIN_FORM_NOT_FOUND', 'button not found: ' + label);
    debug.push({ step: 'click_' + label, message: found.selector });
    await Promise.all([
      page.waitForNavigation({ waitUntil: 'networkidle0', timeout: 30000 }).catch(() => null),
      found.el.click()
    ]);
  };

  const rejectIfLoginError = async (selectors) => {
    const found = await firstMatch(selectors);
    if (found) {
      const text = await page.evaluate((el) => (el.textContent || '').trim(), found.el);
      fail('LOGIN_FAILED', 'login rejected: ' + text);
    }
  };

  const extractStructured = async (containerSelectors) => {
    return page.evaluate((selectors, amountSrc, dateSrc, refSrc) => {
      const amountRe = new RegExp(amountSrc);
      const dateRe = new RegExp(dateSrc);
      const refRe = new RegExp(refSrc);
      const rows = [];
      for (const selector of selectors) {
        for (const el of document.querySelectorAll(selector)) {
          const text = el.innerText || '';
          const amount = text.match(amountRe);
          if (!amount) continue;
          const date = text.match(dateRe);
          const ref = text.replace(amount[0], ' ').match(refRe);
          rows.push({
            amount: amount[1],
            due_date: date ? date[1] : null,
            reference_number: ref ? ref[1] : null
          });
        }
        if (rows.length) break;
      }
      return rows;
    }, containerSelectors, AMOUNT_RE, DATE_RE, REF_RE);
  };

  const extractFreeText = async (maxAmount) => {
    return page.evaluate((amountSrc, dateSrc, max) => {
      const amountRe = new RegExp(amountSrc);
      const dateRe = new RegExp(dateSrc);
      const rows = [];
      const lines = (document.body.innerText || '').split('\n');
      for (const line of lines) {
        const amount = line.match(amountRe);
        if (!amount) continue;
        const numeric = parseFloat(amount[1].replace(/\./g, '').replace(',', '.'));
        if (!numeric || numeric <= 0 || numeric > max) continue;
        const date = line.match(dateRe);
        rows.push({ amount: amount[1], due_date: date ? date[1] : null });
      }
      return rows;
    }, AMOUNT_RE, DATE_RE, maxAmount);
  };

  const capture = () => page.screenshot({ encoding: 'base64' }).catch(() => null);

  try {
"##;

const EPILOGUE: &str = r##"
    debug.push({ step: 'capture_evidence' });
    const screenshot = await capture();
    return { success: true, bills, debug, screenshot };
  } catch (error) {
    debug.push({ step: 'error', message: error.message });
    const screenshot = await capture();
    return {
      success: false,
      bills: [],
      error: error.message,
      error_code: error.code || null,
      debug,
      screenshot
    };
  }
};
"##;

pub(crate) fn compose_script(body: &str) -> String {
    format!("{PRELUDE}{body}{EPILOGUE}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_adapters() -> Vec<Box<dyn ProviderAdapter>> {
        ProviderId::ALL
            .iter()
            .map(|p| adapter_for_provider(p.as_str()).unwrap())
            .collect()
    }

    #[test]
    fn registry_covers_the_closed_provider_set_and_nothing_else() {
        for provider in ProviderId::ALL {
            let adapter = adapter_for_provider(provider.as_str()).unwrap();
            assert_eq!(adapter.provider_id(), provider);
        }
        assert!(adapter_for_provider("VODAFONE").is_none());
        assert!(adapter_for_provider("").is_none());
    }

    #[test]
    fn scripts_never_embed_credentials() {
        for adapter in all_adapters() {
            let script = adapter.script();
            assert!(
                script.contains("context.username"),
                "{} reads username from context",
                adapter.provider_id()
            );
            assert!(
                script.contains("context.password"),
                "{} reads password from context",
                adapter.provider_id()
            );
        }
    }

    #[test]
    fn every_script_is_failure_tolerant() {
        for adapter in all_adapters() {
            let script = adapter.script();
            assert!(script.contains("catch (error)"));
            assert!(script.contains("error_code: error.code || null"));
            // Screenshot capture never aborts the outcome.
            assert!(script.contains(".catch(() => null)"));
        }
    }

    #[test]
    fn full_login_scripts_layer_all_three_strategies() {
        for provider in [ProviderId::Deh, ProviderId::Eydap, ProviderId::Cosmote] {
            let script = adapter_for_provider(provider.as_str()).unwrap().script();
            assert!(script.contains("extractStructured("), "{provider} strategy A");
            assert!(script.contains("extract_page_state"), "{provider} strategy B");
            assert!(script.contains("extractFreeText("), "{provider} strategy C");
        }
    }

    #[test]
    fn sso_scripts_detect_the_second_factor_challenge() {
        for provider in [ProviderId::Aade, ProviderId::Efka] {
            let script = adapter_for_provider(provider.as_str()).unwrap().script();
            assert!(script.contains("detect_second_factor"), "{provider}");
            assert!(script.contains("'2FA_REQUIRED'"), "{provider}");
        }
    }

    #[test]
    fn classification_fills_missing_codes_from_messages() {
        let classified = classify_outcome(ScrapeOutcome {
            success: false,
            bills: vec![],
            error: Some("login rejected: Λανθασμένος κωδικός".into()),
            error_code: None,
            debug: vec![],
            screenshot: None,
        });
        assert_eq!(classified.error_code, Some(ErrorCode::LoginFailed));

        let classified = classify_outcome(ScrapeOutcome {
            success: false,
            bills: vec![],
            error: Some("waiting for selector `.bills` failed".into()),
            error_code: None,
            debug: vec![],
            screenshot: None,
        });
        assert_eq!(classified.error_code, Some(ErrorCode::LoginFormNotFound));

        let classified = classify_outcome(ScrapeOutcome {
            success: false,
            bills: vec![],
            error: Some("net::ERR_CONNECTION_RESET".into()),
            error_code: None,
            debug: vec![],
            screenshot: None,
        });
        assert_eq!(classified.error_code, Some(ErrorCode::ScraperError));
    }

    #[test]
    fn classification_preserves_script_assigned_codes() {
        let original = ScrapeOutcome::failure(ErrorCode::TwoFactorRequired, "otp required");
        let classified = classify_outcome(original.clone());
        assert_eq!(classified.error_code, Some(ErrorCode::TwoFactorRequired));
        assert_eq!(classified, original);
    }
}
