//! Shared TaxisNet SSO first-factor login used by the AADE and EFKA adapters.
//!
//! Both portals delegate authentication to the government identity provider.
//! The pipeline drives the first factor only: when the one-time-code
//! challenge appears after login, the script short-circuits with a terminal
//! `2FA_REQUIRED` outcome instead of navigating further.

pub(crate) const TAXISNET_LOGIN: &str = r##"
    debug.push({ step: 'navigate', url: 'https://www1.gsis.gr/oauth2server/login.jsp' });
    await page.goto('https://www1.gsis.gr/oauth2server/login.jsp', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'enter_credentials' });
    await typeInto(
      ['input[name="username"]', '#username', 'input[name="j_username"]'],
      context.username,
      'username'
    );
    await typeInto(
      ['input[name="password"]', '#password', 'input[name="j_password"]'],
      context.password,
      'password'
    );
    await clickAndWait(['button[type="submit"]', 'input[type="submit"]', '#btn-login-submit'], 'login');
    await rejectIfLoginError(['.alert-danger', '.error', '#login-error', '.login-error']);

    debug.push({ step: 'detect_second_factor' });
    const otp = await firstMatch([
      'input[name="otp"]',
      'input[autocomplete="one-time-code"]',
      '#otp',
      'input[name="smsCode"]'
    ]);
    if (otp) {
      fail('2FA_REQUIRED', 'TaxisNet requires a one-time code after login');
    }
"##;
